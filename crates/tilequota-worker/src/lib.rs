//! Disk quota enforcement for tilequota.
//!
//! This crate provides:
//! - [`DiskQuotaMonitor`], which owns the configuration, runs usage checks
//!   and launches eviction cycles
//! - [`CleanupScheduler`], the periodic task driving the checks
//! - [`CacheCleaner`], one eviction cycle over a set of layers
//! - quota resolvers that re-read limits and usage while a cycle runs

pub mod cleaner;
pub mod error;
pub mod monitor;
mod permits;
pub mod resolver;
pub mod scheduler;

pub use cleaner::{CacheCleaner, CycleReport};
pub use error::EvictionError;
pub use monitor::{DiskQuotaMonitor, MonitorState};
pub use resolver::{CycleTarget, GlobalQuotaResolver, LayerQuotaResolver, QuotaResolver};
pub use scheduler::CleanupScheduler;
