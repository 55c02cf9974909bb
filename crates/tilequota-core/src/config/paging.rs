//! Page geometry configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default number of tiles along each side of a page.
pub const DEFAULT_PAGE_BLOCK_SIZE: u32 = 16;

/// How tiles are grouped into pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSizing {
    /// Every page spans `page_block_size` tiles per side.
    Fixed,
    /// Pages grow with the level size so deep levels hold fewer, larger pages.
    Adaptive,
}

/// Page geometry settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PagingConfig {
    /// Sizing strategy.
    #[serde(default = "default_sizing")]
    pub sizing: PageSizing,
    /// Tiles per page side for [`PageSizing::Fixed`].
    #[serde(default = "default_page_block_size")]
    #[validate(range(min = 1))]
    pub page_block_size: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            sizing: default_sizing(),
            page_block_size: default_page_block_size(),
        }
    }
}

fn default_sizing() -> PageSizing {
    PageSizing::Fixed
}

fn default_page_block_size() -> u32 {
    DEFAULT_PAGE_BLOCK_SIZE
}
