//! Per-tile-set aggregation of quota updates.

use std::collections::HashMap;

use tilequota_core::types::QuotaDelta;
use tilequota_entity::event::QuotaUpdate;
use tilequota_entity::page::TilePage;
use tilequota_entity::stats::PageStatsPayload;

/// Byte and per-page tile-count changes of one tile set awaiting commit.
#[derive(Debug, Default)]
pub(crate) struct TileSetAggregate {
    pub(crate) bytes: QuotaDelta,
    pages: HashMap<TilePage, PageStatsPayload>,
}

impl TileSetAggregate {
    pub(crate) fn add(&mut self, update: &QuotaUpdate) {
        self.bytes += QuotaDelta::from(update.size_delta);
        if update.tile_delta != 0 {
            let payload = self
                .pages
                .entry(update.page.clone())
                .or_insert_with(|| PageStatsPayload::new(update.page.clone()));
            payload.num_tiles = payload.num_tiles.saturating_add(update.tile_delta);
        }
    }

    /// Page payloads with a net tile-count change.
    pub(crate) fn payloads(&self) -> Vec<PageStatsPayload> {
        self.pages
            .values()
            .filter(|p| p.num_tiles != 0)
            .cloned()
            .collect()
    }
}
