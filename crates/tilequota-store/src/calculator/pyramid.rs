//! Page geometry of one grid subset.

use std::collections::BTreeMap;

use tilequota_core::config::{PageSizing, PagingConfig};
use tilequota_core::types::{GridCoverage, GridSubset};

/// Page layout of one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLevel {
    /// Tile bounds of the level.
    pub coverage: GridCoverage,
    /// Tiles per page along x, never wider than the level.
    pub tiles_per_page_x: u64,
    /// Tiles per page along y, never taller than the level.
    pub tiles_per_page_y: u64,
}

impl PageLevel {
    fn new(coverage: GridCoverage, paging: &PagingConfig) -> Self {
        Self {
            coverage,
            tiles_per_page_x: tiles_per_side(coverage.width(), paging),
            tiles_per_page_y: tiles_per_side(coverage.height(), paging),
        }
    }

    /// Number of page columns.
    pub fn pages_wide(&self) -> u64 {
        self.coverage.width().div_ceil(self.tiles_per_page_x)
    }

    /// Number of page rows.
    pub fn pages_high(&self) -> u64 {
        self.coverage.height().div_ceil(self.tiles_per_page_y)
    }

    /// Capacity of an interior page.
    pub fn tiles_per_page(&self) -> u64 {
        self.tiles_per_page_x * self.tiles_per_page_y
    }

    /// Page coordinates of a tile, relative to the level's lower corner.
    /// Tiles below the corner map to the first page.
    pub fn page_of(&self, x: u64, y: u64) -> (u64, u64) {
        (
            x.saturating_sub(self.coverage.min_x) / self.tiles_per_page_x,
            y.saturating_sub(self.coverage.min_y) / self.tiles_per_page_y,
        )
    }

    /// Tile bounds of a page, clipped to the level. `None` past the edge.
    pub fn page_bounds(&self, page_x: u64, page_y: u64) -> Option<GridCoverage> {
        let min_x = self
            .coverage
            .min_x
            .checked_add(page_x.checked_mul(self.tiles_per_page_x)?)?;
        let min_y = self
            .coverage
            .min_y
            .checked_add(page_y.checked_mul(self.tiles_per_page_y)?)?;
        if min_x > self.coverage.max_x || min_y > self.coverage.max_y {
            return None;
        }
        let max_x = (min_x + self.tiles_per_page_x - 1).min(self.coverage.max_x);
        let max_y = (min_y + self.tiles_per_page_y - 1).min(self.coverage.max_y);
        Some(GridCoverage::new(
            self.coverage.zoom_level,
            min_x,
            min_y,
            max_x,
            max_y,
        ))
    }

    /// Exact capacity of a page; edge pages hold fewer tiles.
    pub fn page_capacity(&self, page_x: u64, page_y: u64) -> u64 {
        self.page_bounds(page_x, page_y)
            .map(|b| b.tile_count())
            .unwrap_or(0)
    }
}

/// Page layout of every cached level of a grid subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePyramid {
    levels: BTreeMap<u8, PageLevel>,
}

impl PagePyramid {
    /// Build the layout for a grid subset.
    pub fn new(subset: &GridSubset, paging: &PagingConfig) -> Self {
        let levels = subset
            .coverages
            .iter()
            .map(|coverage| (coverage.zoom_level, PageLevel::new(*coverage, paging)))
            .collect();
        Self { levels }
    }

    /// Layout of one level.
    pub fn level(&self, zoom_level: u8) -> Option<&PageLevel> {
        self.levels.get(&zoom_level)
    }

    /// All levels, lowest zoom first.
    pub fn levels(&self) -> impl Iterator<Item = &PageLevel> {
        self.levels.values()
    }

    /// Total number of pages across all levels.
    pub fn page_count(&self) -> u64 {
        self.levels
            .values()
            .map(|l| l.pages_wide().saturating_mul(l.pages_high()))
            .sum()
    }
}

fn tiles_per_side(tiles: u64, paging: &PagingConfig) -> u64 {
    let per_side = match paging.sizing {
        PageSizing::Fixed => u64::from(paging.page_block_size),
        PageSizing::Adaptive if tiles <= 1 => 1,
        // n / log1.1(n): small levels get one page per few tiles, deep
        // levels get pages of a few hundred tiles per side.
        PageSizing::Adaptive => {
            let n = tiles as f64;
            (n / (n.ln() / 1.1f64.ln())).ceil() as u64
        }
    };
    per_side.clamp(1, tiles.max(1))
}
