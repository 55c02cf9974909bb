//! Events reported by the tile storage path and queued for aggregation.

use serde::{Deserialize, Serialize};

use crate::page::TilePage;
use crate::tileset::TileSet;

/// A change in stored bytes for one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUpdate {
    /// Tile set the tile belongs to.
    pub tile_set: TileSet,
    /// Page the tile falls in.
    pub page: TilePage,
    /// Signed byte change, already rounded to the disk block size.
    pub size_delta: i64,
    /// Signed tile-count change (`+1` stored, `-1` deleted, `0` replaced).
    pub tile_delta: i64,
}

/// A tile was served from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Page the tile falls in.
    pub page: TilePage,
    /// Number of hits (usually one).
    pub hits: i64,
    /// Time of the request in epoch milliseconds.
    pub access_time_millis: i64,
}
