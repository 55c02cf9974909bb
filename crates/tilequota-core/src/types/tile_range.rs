//! A rectangular block of tiles handed to the truncation collaborator.

use serde::{Deserialize, Serialize};

use super::layer::GridCoverage;

/// The tiles of one tile set at one zoom level inside a bounding box.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRange {
    /// Layer name.
    pub layer_name: String,
    /// Grid set identifier.
    pub gridset_id: String,
    /// MIME format.
    pub mime_type: String,
    /// Parameter-set identifier, if the tile set is a parameter variant.
    pub parameters_id: Option<String>,
    /// Inclusive tile bounds.
    pub bounds: GridCoverage,
}

impl TileRange {
    /// Zoom level of the range.
    pub fn zoom_level(&self) -> u8 {
        self.bounds.zoom_level
    }

    /// Number of tile positions in the range.
    pub fn tile_count(&self) -> u64 {
        self.bounds.tile_count()
    }
}
