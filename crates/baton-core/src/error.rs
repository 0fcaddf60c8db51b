//! Error types for baton-core
//!
//! Only misuse and infrastructure failures are errors. A lost claim race, a
//! stale fixer, or a failed downstream operation are ordinary data returned
//! by the coordinator and the queue.

use thiserror::Error;

/// Core error type for baton operations
#[derive(Debug, Error)]
pub enum Error {
    /// An operation that needs a calling agent identity was invoked without one
    #[error("Missing context: {0}")]
    MissingContext(String),

    /// Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Stored text that does not decode (timestamps, status names, payload JSON)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid input to an operation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid configuration value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Filesystem errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl Error {
    /// Short machine-readable code for the error kind
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingContext(_) => "MISSING_CONTEXT",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

/// Result type alias for baton-core operations
pub type Result<T> = std::result::Result<T, Error>;
