//! Shared fixtures for the disk quota monitor tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use tilequota_core::clock::ManualClock;
use tilequota_core::config::{
    DiskQuotaConfig, LayerConfig, PageSizing, PagingConfig, StoreConfig,
};
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::traits::{TileTruncator, TruncateOutcome};
use tilequota_core::types::{GridCoverage, GridSubset, QuotaDelta, TileRange};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::PolicyRegistry;
use tilequota_entity::stats::PageStatsPayload;
use tilequota_entity::tileset::TileSet;
use tilequota_service::StaticLayerCatalog;
use tilequota_store::memory::MemoryQuotaStore;
use tilequota_store::{QuotaStore, TilePageCalculator};
use tilequota_worker::DiskQuotaMonitor;

pub const GRIDSET: &str = "EPSG:4326";
pub const PNG: &str = "image/png";
pub const TILE: u64 = 4096;

type TileKey = (String, u8, u64, u64);

/// Tile bytes kept in memory. Truncation deletes stored tiles inside the
/// range and reports what it removed.
#[derive(Debug, Default)]
pub struct FakeTileStorage {
    tiles: Mutex<BTreeMap<TileKey, u64>>,
    ranges: Mutex<Vec<TileRange>>,
    fail: AtomicBool,
    calls: AtomicUsize,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeTileStorage {
    /// A storage whose truncations signal `entered` and then block until
    /// `release` is notified.
    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Default::default()
        }
    }

    pub fn put(&self, layer: &str, x: u64, y: u64, z: u8, size: u64) {
        self.tiles
            .lock()
            .unwrap()
            .insert((layer.to_string(), z, x, y), size);
    }

    pub fn contains(&self, layer: &str, x: u64, y: u64, z: u8) -> bool {
        self.tiles
            .lock()
            .unwrap()
            .contains_key(&(layer.to_string(), z, x, y))
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.lock().unwrap().len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<TileRange> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileTruncator for FakeTileStorage {
    async fn truncate(&self, range: &TileRange) -> AppResult<TruncateOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::storage("disk unavailable"));
        }

        let mut tiles = self.tiles.lock().unwrap();
        let doomed: Vec<TileKey> = tiles
            .keys()
            .filter(|(layer, z, x, y)| {
                *layer == range.layer_name
                    && *z == range.zoom_level()
                    && range.bounds.contains(*x, *y)
            })
            .cloned()
            .collect();
        let mut outcome = TruncateOutcome::default();
        for key in doomed {
            if let Some(size) = tiles.remove(&key) {
                outcome.tiles_deleted += 1;
                outcome.bytes_freed += size;
            }
        }
        self.ranges.lock().unwrap().push(range.clone());
        Ok(outcome)
    }
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

/// A memory store over `roads` and `rivers`, 8x8 pages, and a fake tile
/// storage.
pub struct Fixture {
    pub catalog: Arc<StaticLayerCatalog>,
    pub calculator: TilePageCalculator,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryQuotaStore>,
    pub storage: Arc<FakeTileStorage>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_storage(FakeTileStorage::default()).await
    }

    pub async fn with_storage(storage: FakeTileStorage) -> Self {
        let catalog = Arc::new(StaticLayerCatalog::from_config(&[layer("roads"), layer("rivers")]));
        let calculator = TilePageCalculator::new(
            catalog.clone(),
            PagingConfig {
                sizing: PageSizing::Fixed,
                page_block_size: 8,
            },
        );
        let clock = Arc::new(ManualClock::at_minute(1_000));
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
            storage: Arc::new(storage),
        }
    }

    pub fn page(&self, layer: &str, x: u64, y: u64, z: u8) -> TilePage {
        self.calculator.tile_to_page(&tile_set(layer).id(), x, y, z)
    }

    /// Store a tile in the fake storage and account for it.
    pub async fn store_tile(&self, layer: &str, x: u64, y: u64, z: u8) {
        self.storage.put(layer, x, y, z, TILE);
        self.store
            .add_to_quota_and_tile_counts(
                &tile_set(layer),
                QuotaDelta::from(TILE as i64),
                vec![PageStatsPayload::tiles(self.page(layer, x, y, z), 1)],
            )
            .await
            .unwrap();
    }

    /// Record `hits` on the page holding the tile at the current time.
    pub async fn hit(&self, layer: &str, x: u64, y: u64, z: u8, hits: i64) {
        let page = self.page(layer, x, y, z);
        self.store
            .add_hits_and_set_access_time(vec![PageStatsPayload::hits(page, hits, 0)])
            .await
            .unwrap();
    }

    pub fn monitor(&self, config: DiskQuotaConfig) -> DiskQuotaMonitor {
        DiskQuotaMonitor::new(
            self.store.clone(),
            self.calculator.clone(),
            self.storage.clone(),
            PolicyRegistry::with_defaults(),
            config,
        )
        .unwrap()
    }
}
