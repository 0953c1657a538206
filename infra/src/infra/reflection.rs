pub mod client;

pub use client::{ReflectionClient, ReflectionVersion};
