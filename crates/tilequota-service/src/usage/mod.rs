//! Queued tile usage statistics.

pub mod monitor;

pub use monitor::UsageStatsMonitor;
