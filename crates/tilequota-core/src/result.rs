//! Convenience result type alias for tilequota.

use crate::error::AppError;

/// A specialized `Result` type for tilequota operations.
pub type AppResult<T> = Result<T, AppError>;
