//! Tile pages: the unit of eviction and usage statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tileset::TileSetId;

/// A block of tiles within one tile set at one zoom level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePage {
    /// Owning tile set.
    pub tile_set_id: TileSetId,
    /// Page column.
    pub page_x: u32,
    /// Page row.
    pub page_y: u32,
    /// Zoom level.
    pub zoom_level: u8,
}

impl TilePage {
    /// Create a page.
    pub fn new(tile_set_id: TileSetId, page_x: u32, page_y: u32, zoom_level: u8) -> Self {
        Self {
            tile_set_id,
            page_x,
            page_y,
            zoom_level,
        }
    }

    /// Stable primary key of the page.
    pub fn key(&self) -> String {
        format!(
            "{}@{}/{}/{}",
            self.tile_set_id.key(),
            self.zoom_level,
            self.page_x,
            self.page_y
        )
    }

    /// The same page coordinates under another tile set.
    pub fn with_tile_set(&self, tile_set_id: TileSetId) -> TilePage {
        TilePage {
            tile_set_id,
            ..self.clone()
        }
    }
}

impl fmt::Display for TilePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} z{} [{}, {}]",
            self.tile_set_id, self.zoom_level, self.page_x, self.page_y
        )
    }
}
