//! Server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Failure of the byte source feeding a stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("Error reading from random source")]
    Entropy,

    #[error("Cyclic seed is empty")]
    EmptySeed,
}

/// Server-level failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server stopped because of error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Failed to generate random seed: {0}")]
    Seed(#[from] GeneratorError),
}
