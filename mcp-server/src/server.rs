pub mod stdio;

pub use stdio::boot_stdio_server;
