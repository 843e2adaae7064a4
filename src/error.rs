//! Error types for reqbin

use std::io;
use thiserror::Error;

use crate::key::BinKey;

/// Result type for reqbin operations
pub type Result<T> = std::result::Result<T, ReqbinError>;

/// Errors that can occur in reqbin
#[derive(Debug, Error)]
pub enum ReqbinError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No bin registered under the key
    #[error("No bin found for key {0}")]
    BinNotFound(BinKey),

    /// The random source failed or every generated key collided
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Ingestion queue saturated
    #[error("Ingestion queue full (capacity {capacity})")]
    Backpressure {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Request body exceeds the ingress cap
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Actual size (a lower bound when the body was cut off while reading)
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl From<hyper::Error> for ReqbinError {
    fn from(e: hyper::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ReqbinError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(format!("JSON encoding failed: {e}"))
    }
}
