//! Error types for nvstore
//!
//! Provides a unified error type for all file system operations.

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias using NvsError
pub type Result<T> = std::result::Result<T, NvsError>;

/// Unified error type for nvstore operations
#[derive(Debug, Error)]
pub enum NvsError {
    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("file system is not mounted")]
    NotReady,

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no space left in file system")]
    NoSpace,

    #[error("entry not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("storage backend error: {0}")]
    Backend(#[from] BackendError),

    /// Only reported by mount, when no sector layout can be recovered
    #[error("storage corruption: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for NvsError {
    fn from(err: bincode::Error) -> Self {
        NvsError::Serialization(err.to_string())
    }
}
