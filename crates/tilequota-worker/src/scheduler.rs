//! Periodic cleanup task.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs a check at an interval that is re-read before every pass, so a
/// changed cleanup frequency applies from the next tick.
#[derive(Debug)]
pub struct CleanupScheduler {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    /// Spawn the task. `interval` is called before each wait and `tick`
    /// after it.
    pub fn spawn<I, IF, T, TF>(interval: I, tick: T) -> Self
    where
        I: Fn() -> IF + Send + 'static,
        IF: Future<Output = Duration> + Send,
        T: Fn() -> TF + Send + 'static,
        TF: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let wait = interval().await;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                debug!("Running scheduled quota check");
                tick().await;
            }
            info!("Cleanup scheduler stopped");
        });
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Whether the task has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the task and wait for the current pass to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Cleanup scheduler task failed");
            }
        }
    }
}
