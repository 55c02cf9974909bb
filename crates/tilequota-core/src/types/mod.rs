//! Shared value types: byte quotas, grid descriptors and tile ranges.

pub mod layer;
pub mod quota;
pub mod tile_range;

pub use layer::{GridCoverage, GridSubset, LayerInfo};
pub use quota::{Quota, QuotaDelta, StorageUnit};
pub use tile_range::TileRange;
