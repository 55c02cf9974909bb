//! Tile deletion collaborator used by eviction cycles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::tile_range::TileRange;

/// What a confirmed truncation actually removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateOutcome {
    /// Number of tiles removed from storage.
    pub tiles_deleted: u64,
    /// Bytes released, as accounted by the quota engine.
    pub bytes_freed: u64,
}

/// Deletes tiles from the byte storage backend.
///
/// Implementations return only once the deletion is confirmed. Deletions
/// performed through this trait are accounted by the caller and must not
/// also be reported through the quota-update path.
#[async_trait]
pub trait TileTruncator: Send + Sync + std::fmt::Debug + 'static {
    /// Delete every stored tile inside `range`.
    async fn truncate(&self, range: &TileRange) -> AppResult<TruncateOutcome>;
}
