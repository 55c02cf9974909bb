//! Layer catalog built from configuration.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use tilequota_core::config::LayerConfig;
use tilequota_core::traits::LayerCatalog;
use tilequota_core::types::LayerInfo;

#[derive(Debug, Clone)]
struct CatalogEntry {
    info: LayerInfo,
    parameter_ids: BTreeSet<String>,
}

/// A [`LayerCatalog`] holding layers declared in configuration.
///
/// Layers can be added and removed while the engine runs; readers always
/// see the current set.
#[derive(Debug, Default)]
pub struct StaticLayerCatalog {
    layers: DashMap<String, CatalogEntry>,
    generation: AtomicU64,
}

impl StaticLayerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the `[[layers]]` entries of the configuration.
    pub fn from_config(layers: &[LayerConfig]) -> Self {
        let catalog = Self::new();
        for layer in layers {
            catalog.insert(layer);
        }
        catalog
    }

    /// Add or replace a layer.
    pub fn insert(&self, layer: &LayerConfig) {
        self.insert_layer(
            layer.to_layer_info(),
            layer.parameter_ids.iter().cloned().collect(),
        );
    }

    /// Add or replace a layer from its description.
    pub fn insert_layer(&self, info: LayerInfo, parameter_ids: BTreeSet<String>) {
        debug!(layer = %info.name, "Registering layer");
        self.layers.insert(
            info.name.clone(),
            CatalogEntry {
                info,
                parameter_ids,
            },
        );
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a parameter variant with cached tiles. Returns `false` for an
    /// unknown layer.
    pub fn add_parameter_id(&self, layer_name: &str, parameters_id: &str) -> bool {
        match self.layers.get_mut(layer_name) {
            Some(mut entry) => {
                entry.parameter_ids.insert(parameters_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove a layer. Returns `true` if it existed.
    pub fn remove(&self, layer_name: &str) -> bool {
        let removed = self.layers.remove(layer_name).is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl LayerCatalog for StaticLayerCatalog {
    fn layer_names(&self) -> BTreeSet<String> {
        self.layers.iter().map(|e| e.key().clone()).collect()
    }

    fn layer(&self, name: &str) -> Option<LayerInfo> {
        self.layers.get(name).map(|e| e.info.clone())
    }

    fn cached_parameter_ids(&self, name: &str) -> BTreeSet<String> {
        self.layers
            .get(name)
            .map(|e| e.parameter_ids.clone())
            .unwrap_or_default()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
