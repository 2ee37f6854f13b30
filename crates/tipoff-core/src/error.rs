//! Error types and result aliases for tipoff.
//!
//! Core only validates identifiers; every other failure belongs to the
//! crate that produces it.

/// The result type used throughout tipoff core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tipoff core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid identifier error.
    #[must_use]
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }
}
