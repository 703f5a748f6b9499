pub mod client;
pub mod protocol;
pub mod server;

pub use client::StreamClient;
pub use server::{serve_stream, StreamServer};
