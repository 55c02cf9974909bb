//! Errors ending an eviction cycle early.

use tilequota_core::error::AppError;

/// Why an eviction cycle stopped before usage fell under the limit.
#[derive(Debug, thiserror::Error)]
pub enum EvictionError {
    /// The cycle was cancelled or the monitor is shutting down
    #[error("Eviction cycle cancelled")]
    Cancelled,

    /// The truncator failed or timed out; counters were left unchanged
    #[error("Tile truncation failed: {0}")]
    Truncation(String),

    /// Store or configuration error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl EvictionError {
    /// Whether the cycle ended through cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
