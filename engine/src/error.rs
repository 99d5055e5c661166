//! Error types shared by the tether engine and client.

use thiserror::Error;

/// All possible errors from the replication core and its client surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("remote call '{method}' exceeded {limit_ms}ms")]
    Timeout { method: String, limit_ms: u64 },

    #[error("remote error: {0}")]
    Remote(String),
}

/// Result type for engine and client operations.
pub type Result<T> = std::result::Result<T, Error>;
