//! Error types for the delivery pipeline.
//!
//! Ordinary delivery failures (non-2xx responses, transport errors, rate
//! limiting) are never errors here; the sender captures them in the attempt
//! outcome. These types cover what can actually abort the pipeline: store
//! failures and unusable configuration.

use thiserror::Error;

/// Result type alias using `DeliveryError`.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors that can abort delivery processing.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Failure in the core store or configuration layer.
    #[error(transparent)]
    Core(#[from] relay_core::CoreError),

    /// Delivery-side configuration problem, such as an HTTP client that
    /// cannot be built.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DeliveryError {
    /// Creates a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
