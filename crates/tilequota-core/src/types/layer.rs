//! Read-only descriptors of a cached layer as seen by the quota engine.

use serde::{Deserialize, Serialize};

/// Inclusive tile index bounds of a grid subset at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoverage {
    /// Zoom level the bounds apply to.
    pub zoom_level: u8,
    /// Lowest tile column.
    pub min_x: u64,
    /// Lowest tile row.
    pub min_y: u64,
    /// Highest tile column (inclusive).
    pub max_x: u64,
    /// Highest tile row (inclusive).
    pub max_y: u64,
}

impl GridCoverage {
    /// Create coverage bounds, normalizing swapped corners.
    pub fn new(zoom_level: u8, min_x: u64, min_y: u64, max_x: u64, max_y: u64) -> Self {
        Self {
            zoom_level,
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
        }
    }

    /// Number of tile columns covered.
    pub fn width(&self) -> u64 {
        self.max_x - self.min_x + 1
    }

    /// Number of tile rows covered.
    pub fn height(&self) -> u64 {
        self.max_y - self.min_y + 1
    }

    /// Total number of tiles covered.
    pub fn tile_count(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    /// Whether the tile lies inside the bounds.
    pub fn contains(&self, x: u64, y: u64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// The portion of a grid set a layer is cached for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSubset {
    /// Grid set identifier (e.g. `EPSG:4326`).
    pub gridset_id: String,
    /// Coverage per cached zoom level.
    #[serde(default)]
    pub coverages: Vec<GridCoverage>,
}

impl GridSubset {
    /// Coverage at a zoom level, if that level is cached.
    pub fn coverage(&self, zoom_level: u8) -> Option<&GridCoverage> {
        self.coverages.iter().find(|c| c.zoom_level == zoom_level)
    }

    /// Lowest cached zoom level.
    pub fn zoom_start(&self) -> Option<u8> {
        self.coverages.iter().map(|c| c.zoom_level).min()
    }

    /// Highest cached zoom level.
    pub fn zoom_stop(&self) -> Option<u8> {
        self.coverages.iter().map(|c| c.zoom_level).max()
    }
}

/// The live configuration of one cached layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Layer name.
    pub name: String,
    /// Cached MIME formats (e.g. `image/png`).
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Grid subsets the layer is cached in.
    #[serde(default)]
    pub grid_subsets: Vec<GridSubset>,
}

impl LayerInfo {
    /// Look up a grid subset by grid set id.
    pub fn grid_subset(&self, gridset_id: &str) -> Option<&GridSubset> {
        self.grid_subsets.iter().find(|g| g.gridset_id == gridset_id)
    }

    /// Whether the layer still caches the given format.
    pub fn has_mime_type(&self, mime_type: &str) -> bool {
        self.mime_types.iter().any(|m| m == mime_type)
    }
}
