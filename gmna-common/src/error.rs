//! Common error types for GMNA

use thiserror::Error;

/// Common result type for GMNA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across GMNA crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether repeating the same operation could succeed
    ///
    /// Input and configuration problems are deterministic; everything else
    /// (database, filesystem, internal) may be transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::InvalidInput(_) | Error::Config(_) | Error::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Internal("locked".into()).is_transient());
        assert!(Error::Io(std::io::Error::other("disk")).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
        assert!(!Error::Config("missing".into()).is_transient());
    }
}
