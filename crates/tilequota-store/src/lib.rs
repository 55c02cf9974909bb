//! # tilequota-store
//!
//! The persistence and transaction boundary of the quota engine:
//! - [`calculator`] maps layers to tile sets and tiles to pages
//! - [`store::QuotaStore`] is the store contract
//! - [`writer`] owns the single task that folds hit reports into page stats
//! - [`memory`] and [`postgres`] are the two store backends
//! - [`provider`] selects a backend from configuration

pub mod calculator;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod provider;
pub mod store;
pub mod writer;

pub use calculator::TilePageCalculator;
pub use provider::QuotaStoreManager;
pub use store::{QuotaStore, StatsFuture};
