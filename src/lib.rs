//! A typed, multi-stream, multi-client media distribution system.

pub mod address;
pub mod client;
pub mod error;
pub mod guid;
pub mod message;
pub mod net;
pub mod server;
pub mod workpool;
