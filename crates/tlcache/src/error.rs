//! Cache-related error types

use std::path::PathBuf;

use thiserror::Error;

/// Cache operation errors
///
/// Tier operations recover from these locally (a failed read is a miss, a
/// failed write is reported as `false`). They only reach callers when a cache
/// is being constructed.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Corrupt cache entry: {}", path.display())]
    CorruptEntry { path: PathBuf },

    #[error("Invalid cache configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }

    pub(crate) fn deserialization(err: impl std::fmt::Display) -> Self {
        Self::Deserialization {
            message: err.to_string(),
        }
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;
