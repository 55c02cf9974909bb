//! Per-page usage statistics and the in-flight payloads that feed them.

use serde::{Deserialize, Serialize};

use tilequota_core::clock::MILLIS_PER_MINUTE;

use crate::page::TilePage;

/// Persisted statistics of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    /// The page these statistics describe.
    pub page: TilePage,
    /// Total hits since the page was created.
    pub num_hits: u64,
    /// Blended hits per minute; `None` until the first hit report.
    pub frequency_of_use: Option<f32>,
    /// Minute of the latest hit report. Never decreases.
    pub last_access_time_minutes: i64,
    /// Minute the page was first seen.
    pub creation_time_minutes: i64,
    /// Tiles currently stored in the page.
    pub tile_count: u64,
    /// `tile_count` relative to the page capacity, in `[0, 1]`.
    pub fill_factor: f32,
}

impl PageStats {
    /// Statistics for a page first seen at `now_minutes`.
    pub fn new(page: TilePage, now_minutes: i64) -> Self {
        Self {
            page,
            num_hits: 0,
            frequency_of_use: None,
            last_access_time_minutes: now_minutes,
            creation_time_minutes: now_minutes,
            tile_count: 0,
            fill_factor: 0.0,
        }
    }

    /// Blended hits per minute, zero before the first report.
    pub fn frequency_of_use_per_minute(&self) -> f32 {
        self.frequency_of_use.unwrap_or(0.0)
    }

    /// Fold a batch of hits reported at `now_minutes` into the statistics.
    ///
    /// The instantaneous rate is the batch divided by the minutes elapsed
    /// since the previous report (at least one). The first report stores the
    /// rate as is; later reports average it with the previous frequency.
    pub fn add_hits(&mut self, batch_hits: u64, now_minutes: i64) {
        let frequency = match self.frequency_of_use {
            Some(previous) => {
                let elapsed = (now_minutes - self.last_access_time_minutes).max(1);
                let rate = batch_hits as f32 / elapsed as f32;
                (previous + rate) / 2.0
            }
            None => batch_hits as f32,
        };
        self.frequency_of_use = Some(frequency);
        self.num_hits = self.num_hits.saturating_add(batch_hits);
        self.last_access_time_minutes = self.last_access_time_minutes.max(now_minutes);
    }

    /// Apply a signed change to the stored tile count and recompute the fill
    /// factor against `capacity`. Counts clamp at zero.
    pub fn add_tiles(&mut self, delta: i64, capacity: u64) {
        self.tile_count = if delta >= 0 {
            self.tile_count.saturating_add(delta.unsigned_abs())
        } else {
            self.tile_count.saturating_sub(delta.unsigned_abs())
        };
        self.update_fill_factor(capacity);
    }

    /// Recompute the fill factor from the stored tile count.
    pub fn update_fill_factor(&mut self, capacity: u64) {
        self.fill_factor = if capacity == 0 {
            0.0
        } else {
            (self.tile_count as f64 / capacity as f64).min(1.0) as f32
        };
    }

    /// Whether the page currently holds tiles and can be evicted.
    pub fn has_tiles(&self) -> bool {
        self.tile_count > 0
    }
}

/// A mutable accumulator of hits and tile-count changes for one page,
/// batched before being committed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStatsPayload {
    /// Target page.
    pub page: TilePage,
    /// Hits to add.
    pub num_hits: i64,
    /// Change to the stored tile count.
    pub num_tiles: i64,
    /// Latest access time reported by the caller, informational only.
    pub last_access_time_millis: i64,
}

impl PageStatsPayload {
    /// An empty payload for `page`.
    pub fn new(page: TilePage) -> Self {
        Self {
            page,
            num_hits: 0,
            num_tiles: 0,
            last_access_time_millis: 0,
        }
    }

    /// A payload carrying only hits.
    pub fn hits(page: TilePage, num_hits: i64, last_access_time_millis: i64) -> Self {
        Self {
            num_hits,
            last_access_time_millis,
            ..Self::new(page)
        }
    }

    /// A payload carrying only a tile-count change.
    pub fn tiles(page: TilePage, num_tiles: i64) -> Self {
        Self {
            num_tiles,
            ..Self::new(page)
        }
    }

    /// Fold another payload for the same page into this one.
    pub fn merge(&mut self, other: &PageStatsPayload) {
        debug_assert_eq!(self.page, other.page);
        self.num_hits = self.num_hits.saturating_add(other.num_hits);
        self.num_tiles = self.num_tiles.saturating_add(other.num_tiles);
        self.last_access_time_millis = self
            .last_access_time_millis
            .max(other.last_access_time_millis);
    }

    /// Hits as an unsigned batch size; negative deltas count as none.
    pub fn batch_hits(&self) -> u64 {
        u64::try_from(self.num_hits).unwrap_or(0)
    }

    /// Reported access time at minute resolution.
    pub fn last_access_time_minutes(&self) -> i64 {
        self.last_access_time_millis.div_euclid(MILLIS_PER_MINUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tileset::TileSet;

    fn page() -> TilePage {
        TilePage::new(TileSet::new("l", "g", "image/png", None).id(), 0, 0, 0)
    }

    #[test]
    fn test_first_report_stores_rate_directly() {
        let t = 28_000_000;
        let mut stats = PageStats::new(page(), t);
        stats.add_hits(100, t);
        assert_eq!(stats.frequency_of_use_per_minute(), 100.0);
        assert_eq!(stats.num_hits, 100);
        assert_eq!(stats.last_access_time_minutes, t);
    }

    #[test]
    fn test_later_report_blends_with_elapsed_minutes() {
        let t = 28_000_000;
        let mut stats = PageStats::new(page(), t);
        stats.add_hits(100, t);
        stats.add_hits(10, t + 2);
        assert_eq!(stats.frequency_of_use_per_minute(), 52.5);
        assert_eq!(stats.num_hits, 110);
        assert_eq!(stats.last_access_time_minutes, t + 2);
    }

    #[test]
    fn test_same_minute_report_uses_one_minute() {
        let t = 500;
        let mut stats = PageStats::new(page(), t);
        stats.add_hits(10, t);
        stats.add_hits(30, t);
        assert_eq!(stats.frequency_of_use_per_minute(), 20.0);
    }

    #[test]
    fn test_last_access_never_decreases() {
        let mut stats = PageStats::new(page(), 100);
        stats.add_hits(1, 100);
        stats.add_hits(1, 90);
        assert_eq!(stats.last_access_time_minutes, 100);
    }

    #[test]
    fn test_fill_factor_is_capped() {
        let mut stats = PageStats::new(page(), 0);
        stats.add_tiles(1, 1);
        assert_eq!(stats.fill_factor, 1.0);
        stats.add_tiles(3, 2);
        assert_eq!(stats.fill_factor, 1.0);
        stats.add_tiles(-3, 4);
        assert_eq!(stats.tile_count, 1);
        assert_eq!(stats.fill_factor, 0.25);
        stats.add_tiles(-10, 4);
        assert_eq!(stats.tile_count, 0);
        assert!(!stats.has_tiles());
    }

    #[test]
    fn test_payload_merge() {
        let mut a = PageStatsPayload::hits(page(), 3, 1_000);
        let b = PageStatsPayload::hits(page(), 4, 120_000);
        a.merge(&b);
        a.merge(&PageStatsPayload::tiles(page(), -1));
        assert_eq!(a.num_hits, 7);
        assert_eq!(a.num_tiles, -1);
        assert_eq!(a.last_access_time_minutes(), 2);
    }
}
