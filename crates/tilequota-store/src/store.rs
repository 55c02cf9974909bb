//! The quota store contract.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use tilequota_core::result::AppResult;
use tilequota_core::types::{Quota, QuotaDelta, TileRange};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::{ExpirationPolicy, Lfu, Lru};
use tilequota_entity::stats::{PageStats, PageStatsPayload};
use tilequota_entity::tileset::{TileSet, TileSetId};

/// Resolves once queued hit payloads have been folded into page
/// statistics, with one entry per distinct page.
pub type StatsFuture = BoxFuture<'static, AppResult<Vec<PageStats>>>;

/// Persistent counters and page statistics.
///
/// Per-tile-set counters and the global counter move together: every
/// mutating operation updates both atomically. Counters never go below
/// zero; a decrement that would is clamped and logged as an
/// inconsistency.
#[async_trait]
pub trait QuotaStore: Send + Sync + fmt::Debug + 'static {
    /// Prepare the store and reconcile it with the layer catalog.
    ///
    /// Tile sets of unknown layers or unconfigured variants are dropped,
    /// missing ones are created, and the global counter is recomputed from
    /// the per-tile-set counters. Safe to call repeatedly.
    async fn start_up(&self) -> AppResult<()>;

    /// Stop background work and release resources.
    async fn destroy(&self) -> AppResult<()>;

    /// Register every tile set of a layer with a zero counter.
    async fn create_layer(&self, layer_name: &str) -> AppResult<()>;

    /// Bytes used by all tile sets.
    async fn get_globally_used_quota(&self) -> AppResult<Quota>;

    /// Bytes used by the tile sets of one layer; zero if unknown.
    async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota>;

    /// Bytes used by one tile set; zero if unknown.
    async fn get_used_quota_by_tile_set_id(&self, id: &TileSetId) -> AppResult<Quota>;

    /// A tracked tile set. Fails with `NotFound` when absent.
    async fn get_tile_set_by_id(&self, id: &TileSetId) -> AppResult<TileSet>;

    /// Every tracked tile set.
    async fn get_tile_sets(&self) -> AppResult<BTreeSet<TileSet>>;

    /// Apply a byte delta and per-page tile-count changes to a tile set as
    /// one atomic update, creating the tile set if missing.
    async fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        delta: QuotaDelta,
        payloads: Vec<PageStatsPayload>,
    ) -> AppResult<()>;

    /// Queue hit reports without waiting for them to be applied.
    fn add_hits_and_set_access_time(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture;

    /// Current statistics of a page.
    async fn get_page_stats(&self, page: &TilePage) -> AppResult<Option<PageStats>>;

    /// The least valuable page holding tiles among `layer_names`, ranked by
    /// `policy`.
    async fn find_page_to_expire(
        &self,
        policy: &dyn ExpirationPolicy,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>>;

    /// Least recently used candidate.
    async fn get_least_recently_used_page(
        &self,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        self.find_page_to_expire(&Lru, layer_names).await
    }

    /// Least frequently used candidate.
    async fn get_least_frequently_used_page(
        &self,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        self.find_page_to_expire(&Lfu, layer_names).await
    }

    /// The tiles a page covers, for truncation.
    async fn get_tiles_for_page(&self, page: &TilePage) -> AppResult<TileRange>;

    /// Drop a page's statistics after its tiles were deleted.
    async fn set_truncated(&self, page: &TilePage) -> AppResult<Option<PageStats>>;

    /// Delete every tile set of a layer. Returns the bytes released.
    async fn delete_layer(&self, layer_name: &str) -> AppResult<Quota>;

    /// Delete the tile sets of one gridset of a layer.
    async fn delete_gridset(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota>;

    /// Delete the tile sets of one parameter variant of a layer.
    async fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> AppResult<Quota>;

    /// Move a layer's tile sets, counters and pages to a new layer name.
    async fn rename_layer(&self, old_name: &str, new_name: &str) -> AppResult<()>;
}
