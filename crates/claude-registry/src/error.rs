//! Error types for registry operations

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("registry connection failed: {0}")]
    Connect(String),

    #[error("registry query failed: {0}")]
    Query(String),
}

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;
