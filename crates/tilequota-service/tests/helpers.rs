//! Shared fixtures for the monitor tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use tilequota_core::clock::ManualClock;
use tilequota_core::config::{LayerConfig, PageSizing, PagingConfig, StoreConfig};
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::types::{GridCoverage, GridSubset, Quota, QuotaDelta, TileRange};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::ExpirationPolicy;
use tilequota_entity::stats::{PageStats, PageStatsPayload};
use tilequota_entity::tileset::{TileSet, TileSetId};
use tilequota_service::StaticLayerCatalog;
use tilequota_store::memory::MemoryQuotaStore;
use tilequota_store::{QuotaStore, StatsFuture, TilePageCalculator};

pub const GRIDSET: &str = "EPSG:900913";
pub const PNG: &str = "image/png";
pub const BLOCK: u64 = 4096;

/// `n` disk blocks as a quota.
pub fn blocks(n: u64) -> Quota {
    Quota::from_bytes(u128::from(n * BLOCK))
}

pub fn layer(name: &str) -> LayerConfig {
    LayerConfig {
        name: name.to_string(),
        mime_types: vec![PNG.to_string()],
        grid_subsets: vec![GridSubset {
            gridset_id: GRIDSET.to_string(),
            coverages: vec![
                GridCoverage::new(0, 0, 0, 0, 0),
                GridCoverage::new(4, 0, 0, 15, 15),
            ],
        }],
        parameter_ids: Vec::new(),
    }
}

pub fn tile_set(layer: &str) -> TileSet {
    TileSet::new(layer, GRIDSET, PNG, None)
}

/// A started in-memory store over the `roads` and `rivers` layers, paged in
/// 8x8 blocks.
pub struct Fixture {
    pub catalog: Arc<StaticLayerCatalog>,
    pub calculator: TilePageCalculator,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryQuotaStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        let catalog = Arc::new(StaticLayerCatalog::from_config(&[layer("roads"), layer("rivers")]));
        let calculator = TilePageCalculator::new(
            catalog.clone(),
            PagingConfig {
                sizing: PageSizing::Fixed,
                page_block_size: 8,
            },
        );
        let clock = Arc::new(ManualClock::at_minute(100));
        let store = Arc::new(MemoryQuotaStore::new(
            calculator.clone(),
            clock.clone(),
            &StoreConfig::default(),
        ));
        store.start_up().await.unwrap();
        Self {
            catalog,
            calculator,
            clock,
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn QuotaStore> {
        self.store.clone()
    }
}

/// Wraps a store and rejects the next `failures` quota writes.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn QuotaStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn QuotaStore>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, writes: usize) {
        self.failures.store(writes, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuotaStore for FlakyStore {
    async fn start_up(&self) -> AppResult<()> {
        self.inner.start_up().await
    }

    async fn destroy(&self) -> AppResult<()> {
        self.inner.destroy().await
    }

    async fn create_layer(&self, layer_name: &str) -> AppResult<()> {
        self.inner.create_layer(layer_name).await
    }

    async fn get_globally_used_quota(&self) -> AppResult<Quota> {
        self.inner.get_globally_used_quota().await
    }

    async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.get_used_quota_by_layer_name(layer_name).await
    }

    async fn get_used_quota_by_tile_set_id(&self, id: &TileSetId) -> AppResult<Quota> {
        self.inner.get_used_quota_by_tile_set_id(id).await
    }

    async fn get_tile_set_by_id(&self, id: &TileSetId) -> AppResult<TileSet> {
        self.inner.get_tile_set_by_id(id).await
    }

    async fn get_tile_sets(&self) -> AppResult<BTreeSet<TileSet>> {
        self.inner.get_tile_sets().await
    }

    async fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        delta: QuotaDelta,
        payloads: Vec<PageStatsPayload>,
    ) -> AppResult<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::database("connection reset"));
        }
        self.inner
            .add_to_quota_and_tile_counts(tile_set, delta, payloads)
            .await
    }

    fn add_hits_and_set_access_time(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture {
        self.inner.add_hits_and_set_access_time(payloads)
    }

    async fn get_page_stats(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        self.inner.get_page_stats(page).await
    }

    async fn find_page_to_expire(
        &self,
        policy: &dyn ExpirationPolicy,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        self.inner.find_page_to_expire(policy, layer_names).await
    }

    async fn get_tiles_for_page(&self, page: &TilePage) -> AppResult<TileRange> {
        self.inner.get_tiles_for_page(page).await
    }

    async fn set_truncated(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        self.inner.set_truncated(page).await
    }

    async fn delete_layer(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.delete_layer(layer_name).await
    }

    async fn delete_gridset(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota> {
        self.inner.delete_gridset(layer_name, gridset_id).await
    }

    async fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> AppResult<Quota> {
        self.inner.delete_parameters(layer_name, parameters_id).await
    }

    async fn rename_layer(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        self.inner.rename_layer(old_name, new_name).await
    }
}
