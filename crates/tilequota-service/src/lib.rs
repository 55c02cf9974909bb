//! # tilequota-service
//!
//! Glue between the tile-cache server and the quota store:
//!
//! - [`catalog::StaticLayerCatalog`] serves layers declared in configuration
//! - [`updates::QuotaUpdatesMonitor`] batches tile stored/deleted events
//! - [`usage::UsageStatsMonitor`] batches tile hits
//!
//! Both monitors own a consumer task that commits aggregated events every
//! [`consumer::COMMIT_INTERVAL`] or once enough events have piled up.

pub mod catalog;
pub mod consumer;
pub mod updates;
pub mod usage;

pub use catalog::StaticLayerCatalog;
pub use consumer::AggregationConfig;
pub use updates::QuotaUpdatesMonitor;
pub use usage::UsageStatsMonitor;
