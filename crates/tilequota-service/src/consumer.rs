//! Queue consumer tasks shared by the quota and usage monitors.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// How long aggregated events wait before they are committed.
pub const COMMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Quota updates aggregated before a commit is forced.
pub const MAX_QUOTA_UPDATES_BEFORE_COMMIT: usize = 1000;

/// Hit reports aggregated before a commit is forced.
pub const MAX_USAGE_STATS_BEFORE_COMMIT: usize = 3000;

/// Batching settings of one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Commit pending aggregates at least this often.
    pub commit_interval: Duration,
    /// Commit as soon as this many events have been aggregated.
    pub max_aggregates: usize,
    /// Capacity of the event queue.
    pub queue_capacity: usize,
}

impl AggregationConfig {
    /// Settings for tile stored/deleted events.
    pub fn quota_updates() -> Self {
        Self {
            commit_interval: COMMIT_INTERVAL,
            max_aggregates: MAX_QUOTA_UPDATES_BEFORE_COMMIT,
            queue_capacity: MAX_QUOTA_UPDATES_BEFORE_COMMIT,
        }
    }

    /// Settings for tile hit events.
    pub fn usage_stats() -> Self {
        Self {
            commit_interval: COMMIT_INTERVAL,
            max_aggregates: MAX_USAGE_STATS_BEFORE_COMMIT,
            queue_capacity: MAX_USAGE_STATS_BEFORE_COMMIT,
        }
    }
}

/// Handle to a spawned consumer task.
#[derive(Debug)]
pub(crate) struct ConsumerHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerHandle {
    /// Spawn `task` with a fresh cancellation token.
    pub(crate) fn spawn<F>(name: &'static str, task: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        debug!(consumer = name, "Consumer started");
        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel the task and wait for it to flush and exit.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!(consumer = self.name, "Consumer stopped"),
                Err(e) => error!(consumer = self.name, error = %e, "Consumer task failed"),
            }
        }
    }
}
