//! Queued tile quota updates.

mod aggregate;
pub mod monitor;

pub use monitor::QuotaUpdatesMonitor;
