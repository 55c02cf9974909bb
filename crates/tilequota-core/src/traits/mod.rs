//! Traits implemented by the surrounding tile-cache server.

pub mod catalog;
pub mod truncator;

pub use catalog::LayerCatalog;
pub use truncator::{TileTruncator, TruncateOutcome};
