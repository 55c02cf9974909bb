//! Shared test helpers for quota store integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tilequota_core::clock::ManualClock;
use tilequota_core::config::{PageSizing, PagingConfig, StoreConfig};
use tilequota_core::traits::LayerCatalog;
use tilequota_core::types::{GridCoverage, GridSubset, LayerInfo};
use tilequota_entity::page::TilePage;
use tilequota_entity::tileset::TileSet;
use tilequota_store::TilePageCalculator;
use tilequota_store::memory::MemoryQuotaStore;

pub const GRIDSET: &str = "EPSG:4326";
pub const PNG: &str = "image/png";

/// A layer catalog that tests can change while the store is running.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    layers: RwLock<BTreeMap<String, (LayerInfo, BTreeSet<String>)>>,
    generation: AtomicU64,
}

impl FakeCatalog {
    /// Add a layer whose gridsets all share `coverages`.
    pub fn add_layer(
        &self,
        name: &str,
        gridsets: &[&str],
        formats: &[&str],
        parameter_ids: &[&str],
        coverages: Vec<GridCoverage>,
    ) {
        let info = LayerInfo {
            name: name.to_string(),
            mime_types: formats.iter().map(|f| f.to_string()).collect(),
            grid_subsets: gridsets
                .iter()
                .map(|g| GridSubset {
                    gridset_id: g.to_string(),
                    coverages: coverages.clone(),
                })
                .collect(),
        };
        let params = parameter_ids.iter().map(|p| p.to_string()).collect();
        self.layers
            .write()
            .unwrap()
            .insert(name.to_string(), (info, params));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Add a single-gridset PNG layer with a 1x1 level 0 and a 16x16 level 3.
    pub fn add_simple_layer(&self, name: &str) {
        self.add_layer(name, &[GRIDSET], &[PNG], &[], default_coverages());
    }

    pub fn remove_layer(&self, name: &str) {
        self.layers.write().unwrap().remove(name);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl LayerCatalog for FakeCatalog {
    fn layer_names(&self) -> BTreeSet<String> {
        self.layers.read().unwrap().keys().cloned().collect()
    }

    fn layer(&self, name: &str) -> Option<LayerInfo> {
        self.layers.read().unwrap().get(name).map(|(info, _)| info.clone())
    }

    fn cached_parameter_ids(&self, name: &str) -> BTreeSet<String> {
        self.layers
            .read()
            .unwrap()
            .get(name)
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

pub fn default_coverages() -> Vec<GridCoverage> {
    vec![
        GridCoverage::new(0, 0, 0, 0, 0),
        GridCoverage::new(3, 0, 0, 15, 15),
    ]
}

/// Fixed 8x8 pages.
pub fn paging() -> PagingConfig {
    PagingConfig {
        sizing: PageSizing::Fixed,
        page_block_size: 8,
    }
}

pub fn calculator(catalog: &Arc<FakeCatalog>) -> TilePageCalculator {
    TilePageCalculator::new(catalog.clone(), paging())
}

pub fn tile_set(layer: &str) -> TileSet {
    TileSet::new(layer, GRIDSET, PNG, None)
}

/// The page holding tile `(x, y, z)` of a layer's default tile set.
pub fn page(layer: &str, x: u64, y: u64, z: u8) -> TilePage {
    let calc = TilePageCalculator::new(Arc::new(FakeCatalog::default()), paging());
    calc.tile_to_page(&tile_set(layer).id(), x, y, z)
}

/// In-memory store with an empty catalog and a clock at minute 10.
pub struct MemoryContext {
    pub catalog: Arc<FakeCatalog>,
    pub clock: Arc<ManualClock>,
    pub store: MemoryQuotaStore,
}

impl MemoryContext {
    pub fn new() -> Self {
        let catalog = Arc::new(FakeCatalog::default());
        let clock = Arc::new(ManualClock::at_minute(10));
        let store = MemoryQuotaStore::new(calculator(&catalog), clock.clone(), &StoreConfig::default());
        Self {
            catalog,
            clock,
            store,
        }
    }
}
