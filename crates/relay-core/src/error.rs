//! Error types and result handling for core operations.
//!
//! Defines the error taxonomy shared by the fan-out and delivery crates:
//! store failures, missing entities, and invalid configuration. Failures
//! local to one event or subscription never surface through these types;
//! they are contained and logged where they happen.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for store and configuration operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Record-store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Creates a store error from a message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a configuration error from a message.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
