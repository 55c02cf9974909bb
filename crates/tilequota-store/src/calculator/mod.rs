//! Maps layer configuration to tile sets, and tiles to pages.
//!
//! The calculator reads the live [`LayerCatalog`] on every call, so layer
//! changes are reflected immediately. Page layouts are cached per layer and
//! gridset until the catalog reports a change.

pub mod pyramid;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use tilequota_core::config::PagingConfig;
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::traits::LayerCatalog;
use tilequota_core::types::TileRange;
use tilequota_entity::page::TilePage;
use tilequota_entity::tileset::{TileSet, TileSetId};

pub use pyramid::{PageLevel, PagePyramid};

/// Layout built under a catalog generation.
type CachedPyramid = (u64, Arc<PagePyramid>);

/// Tile set and page geometry calculator. Clones share the layout cache.
#[derive(Debug, Clone)]
pub struct TilePageCalculator {
    catalog: Arc<dyn LayerCatalog>,
    paging: PagingConfig,
    pyramids: Arc<DashMap<(String, String), CachedPyramid>>,
}

impl TilePageCalculator {
    /// Create a calculator over a layer catalog.
    pub fn new(catalog: Arc<dyn LayerCatalog>, paging: PagingConfig) -> Self {
        Self {
            catalog,
            paging,
            pyramids: Arc::new(DashMap::new()),
        }
    }

    /// The underlying catalog.
    pub fn catalog(&self) -> &Arc<dyn LayerCatalog> {
        &self.catalog
    }

    /// Page geometry settings.
    pub fn paging(&self) -> &PagingConfig {
        &self.paging
    }

    /// Names of all configured layers.
    pub fn layer_names(&self) -> BTreeSet<String> {
        self.catalog.layer_names()
    }

    /// Every gridset × format × parameter variant currently configured for
    /// a layer. Empty for unknown layers and for layers without gridsets or
    /// formats.
    pub fn tile_sets_for(&self, layer_name: &str) -> BTreeSet<TileSet> {
        let Some(layer) = self.catalog.layer(layer_name) else {
            return BTreeSet::new();
        };

        let parameter_ids = self.catalog.cached_parameter_ids(layer_name);
        let variants: Vec<Option<String>> = if parameter_ids.is_empty() {
            vec![None]
        } else {
            parameter_ids.into_iter().map(Some).collect()
        };

        let mut tile_sets = BTreeSet::new();
        for subset in &layer.grid_subsets {
            for format in &layer.mime_types {
                for params in &variants {
                    tile_sets.insert(TileSet::new(
                        layer_name,
                        subset.gridset_id.clone(),
                        format.clone(),
                        params.clone(),
                    ));
                }
            }
        }
        tile_sets
    }

    /// Tile sets of every configured layer.
    pub fn expected_tile_sets(&self) -> BTreeSet<TileSet> {
        self.layer_names()
            .iter()
            .flat_map(|layer| self.tile_sets_for(layer))
            .collect()
    }

    /// Whether the tile set is one of the variants its layer currently
    /// produces.
    pub fn is_configured(&self, tile_set: &TileSet) -> bool {
        self.tile_sets_for(&tile_set.layer_name).contains(tile_set)
    }

    /// Page layout of a tile set's grid subset.
    pub fn pyramid(&self, tile_set_id: &TileSetId) -> Option<Arc<PagePyramid>> {
        // Read before the catalog so a concurrent change leaves the entry stale.
        let generation = self.catalog.generation();
        let key = (
            tile_set_id.layer_name().to_string(),
            tile_set_id.gridset_id().to_string(),
        );
        if let Some(cached) = self.pyramids.get(&key) {
            if cached.0 == generation {
                return Some(cached.1.clone());
            }
        }

        // Drop layouts of earlier generations, including removed layers.
        self.pyramids.retain(|_, (built, _)| *built == generation);
        let layer = self.catalog.layer(tile_set_id.layer_name())?;
        let subset = layer.grid_subset(tile_set_id.gridset_id())?;
        let pyramid = Arc::new(PagePyramid::new(subset, &self.paging));
        self.pyramids.insert(key, (generation, pyramid.clone()));
        Some(pyramid)
    }

    fn level(&self, tile_set_id: &TileSetId, zoom_level: u8) -> Option<PageLevel> {
        self.pyramid(tile_set_id)
            .and_then(|p| p.level(zoom_level).copied())
    }

    fn block(&self) -> u64 {
        u64::from(self.paging.page_block_size.max(1))
    }

    /// The page containing a tile.
    ///
    /// Levels unknown to the catalog fall back to dividing raw tile
    /// coordinates by the page block size.
    pub fn tile_to_page(&self, tile_set_id: &TileSetId, x: u64, y: u64, zoom_level: u8) -> TilePage {
        let (page_x, page_y) = match self.level(tile_set_id, zoom_level) {
            Some(level) => level.page_of(x, y),
            None => (x / self.block(), y / self.block()),
        };
        TilePage::new(
            tile_set_id.clone(),
            u32::try_from(page_x).unwrap_or(u32::MAX),
            u32::try_from(page_y).unwrap_or(u32::MAX),
            zoom_level,
        )
    }

    /// Maximum tiles a page at this level can hold, bounded by the level's
    /// coverage.
    pub fn tiles_per_page(&self, tile_set_id: &TileSetId, zoom_level: u8) -> u64 {
        match self.level(tile_set_id, zoom_level) {
            Some(level) => level.tiles_per_page(),
            None => self.block() * self.block(),
        }
    }

    /// Exact capacity of one page; smaller than [`Self::tiles_per_page`] for
    /// pages on the edge of the coverage.
    pub fn page_capacity(&self, page: &TilePage) -> u64 {
        match self.level(&page.tile_set_id, page.zoom_level) {
            Some(level) => level.page_capacity(u64::from(page.page_x), u64::from(page.page_y)),
            None => self.block() * self.block(),
        }
    }

    /// The tiles covered by a page, clipped to the grid coverage.
    pub fn to_tile_range(&self, page: &TilePage) -> AppResult<TileRange> {
        let id = &page.tile_set_id;
        let level = self.level(id, page.zoom_level).ok_or_else(|| {
            AppError::not_found(format!(
                "No coverage for tile set '{id}' at zoom level {}",
                page.zoom_level
            ))
        })?;
        let bounds = level
            .page_bounds(u64::from(page.page_x), u64::from(page.page_y))
            .ok_or_else(|| AppError::not_found(format!("Page {page} lies outside the coverage")))?;

        Ok(TileRange {
            layer_name: id.layer_name().to_string(),
            gridset_id: id.gridset_id().to_string(),
            mime_type: id.blob_format().to_string(),
            parameters_id: id.parameters_id().map(String::from),
            bounds,
        })
    }
}
