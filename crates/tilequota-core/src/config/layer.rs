//! Statically configured layers.

use serde::{Deserialize, Serialize};

use crate::types::layer::{GridSubset, LayerInfo};

/// A layer declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Layer name.
    pub name: String,
    /// Cached MIME formats.
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Grid subsets with per-level coverage.
    #[serde(default)]
    pub grid_subsets: Vec<GridSubset>,
    /// Parameter-set identifiers with cached tiles.
    #[serde(default)]
    pub parameter_ids: Vec<String>,
}

impl LayerConfig {
    /// The layer description seen by the quota engine.
    pub fn to_layer_info(&self) -> LayerInfo {
        LayerInfo {
            name: self.name.clone(),
            mime_types: self.mime_types.clone(),
            grid_subsets: self.grid_subsets.clone(),
        }
    }
}
