//! Core error model.

use thiserror::Error;

/// Result type used by the core building blocks.
pub type CoreResult<T> = Result<T, CoreError>;

/// Validation failure for identifiers.
///
/// Infrastructure failures (I/O, remote sources, persistence) have their own
/// error types in the crates that perform them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. empty or unsafe for a file name).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
