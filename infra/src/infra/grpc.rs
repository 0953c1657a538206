pub mod connection;

pub use connection::GrpcConnection;
