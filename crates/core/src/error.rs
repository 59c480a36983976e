//! Error types for the Recallkit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Errors raised by the memory tiers and the context assembler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MemoryError {
    /// The caller supplied input the store refuses to persist.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A record that was required to exist does not.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The durable store or the ephemeral cache is unreachable, failed, or timed out.
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    /// The backend does not expose the requested capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl MemoryError {
    /// Shorthand used by backends when wrapping driver errors.
    pub fn dependency(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Dependency(format!("{context}: {err}"))
    }
}

/// Result type alias using [`MemoryError`].
pub type Result<T> = std::result::Result<T, MemoryError>;
