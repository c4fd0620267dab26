//! Error taxonomy (spec §7): Protocol, Transport, Authentication, Resource, Rate, Backpressure.
//!
//! Every category is fatal to a single connection unless noted otherwise; none of them
//! are ever allowed to propagate across connections (a peer's error must not affect any
//! other peer or the server as a whole).

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemStreamError {
    #[error("protocol error from {addr:?}: {reason}")]
    Protocol { addr: Option<SocketAddr>, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed for {addr:?}: {reason}")]
    Authentication { addr: Option<SocketAddr>, reason: String },

    #[error("resource error: {0}")]
    Resource(String),

    #[error("rate limit exceeded by {addr:?}")]
    Rate { addr: Option<SocketAddr> },

    #[error("backpressure: dropped {count} queued items ({where_})")]
    Backpressure { count: usize, where_: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemStreamError>;
