//! # tilequota-entity
//!
//! Domain models for tilequota. Tile sets and pages are identity types,
//! [`stats::PageStats`] carries the derived usage statistics persisted per
//! page, and [`policy`] holds the expiration policies that rank pages for
//! eviction.

pub mod event;
pub mod page;
pub mod policy;
pub mod stats;
pub mod tileset;

pub use page::TilePage;
pub use policy::{ExpirationPolicy, Lfu, Lru, PolicyKind, PolicyRegistry};
pub use stats::{PageStats, PageStatsPayload};
pub use tileset::{TileSet, TileSetId};
