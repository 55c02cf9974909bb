//! Hit aggregation writer.
//!
//! Hit reports are queued on a bounded channel and folded into page
//! statistics by a single task, so updates to one page never interleave.
//! Batches waiting in the queue are coalesced per page before they are
//! applied.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_entity::page::TilePage;
use tilequota_entity::stats::{PageStats, PageStatsPayload};

use crate::store::StatsFuture;

/// Applies coalesced hit payloads to persistent page statistics.
#[async_trait]
pub trait HitSink: Send + Sync + 'static {
    /// Fold one payload per page into the stored statistics and return the
    /// updated statistics. Payloads of untracked tile sets are skipped.
    async fn apply_hits(&self, payloads: Vec<PageStatsPayload>) -> AppResult<Vec<PageStats>>;
}

struct HitRequest {
    payloads: Vec<PageStatsPayload>,
    reply: oneshot::Sender<AppResult<Vec<PageStats>>>,
}

/// Handle to the hit aggregation task.
pub struct HitWriter {
    tx: mpsc::Sender<HitRequest>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for HitWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HitWriter")
            .field("capacity", &self.tx.max_capacity())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl HitWriter {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(sink: Arc<dyn HitSink>, capacity: usize, batch_limit: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(sink, rx, cancel.clone(), batch_limit.max(1)));
        Self {
            tx,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue hit payloads without blocking.
    ///
    /// When the queue is full or the writer has stopped, the batch is
    /// dropped and the returned future resolves to an error immediately.
    pub fn submit(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture {
        if payloads.is_empty() {
            return Box::pin(future::ready(Ok(Vec::new())));
        }

        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(HitRequest { payloads, reply }) {
            Ok(()) => Box::pin(async move {
                rx.await.map_err(|_| {
                    AppError::service_unavailable("Hit writer stopped before applying the batch")
                })?
            }),
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(
                    pages = request.payloads.len(),
                    "Hit queue full, dropping hit batch"
                );
                Box::pin(future::ready(Err(AppError::service_unavailable(
                    "Hit queue is full",
                ))))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Box::pin(future::ready(Err(
                AppError::service_unavailable("Hit writer is shut down"),
            ))),
        }
    }

    /// Whether the writer has been asked to stop.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting hits, apply what is already queued and wait for the
    /// task to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Hit writer task failed");
            }
        }
    }
}

async fn run(
    sink: Arc<dyn HitSink>,
    mut rx: mpsc::Receiver<HitRequest>,
    cancel: CancellationToken,
    batch_limit: usize,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => return,
            },
        };

        let mut batch = vec![first];
        while batch.len() < batch_limit {
            match rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }
        apply(sink.as_ref(), batch).await;
    }

    rx.close();
    let mut pending = Vec::new();
    while let Ok(request) = rx.try_recv() {
        pending.push(request);
    }
    if !pending.is_empty() {
        debug!(batches = pending.len(), "Applying queued hits before shutdown");
        apply(sink.as_ref(), pending).await;
    }
}

async fn apply(sink: &dyn HitSink, batch: Vec<HitRequest>) {
    let mut merged: BTreeMap<TilePage, PageStatsPayload> = BTreeMap::new();
    for request in &batch {
        for payload in &request.payloads {
            merged
                .entry(payload.page.clone())
                .and_modify(|existing| existing.merge(payload))
                .or_insert_with(|| payload.clone());
        }
    }

    let pages = merged.len();
    let result = sink.apply_hits(merged.into_values().collect()).await;
    debug!(requests = batch.len(), pages, ok = result.is_ok(), "Applied hit batch");

    match result {
        Ok(stats) => {
            let by_page: HashMap<TilePage, PageStats> = stats
                .into_iter()
                .map(|s| (s.page.clone(), s))
                .collect();
            for request in batch {
                let distinct: BTreeSet<&TilePage> =
                    request.payloads.iter().map(|p| &p.page).collect();
                let stats = distinct
                    .into_iter()
                    .filter_map(|page| by_page.get(page).cloned())
                    .collect();
                let _ = request.reply.send(Ok(stats));
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to apply hit batch");
            for request in batch {
                let _ = request.reply.send(Err(e.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use tilequota_entity::tileset::TileSet;

    #[derive(Default)]
    struct RecordingSink {
        calls: StdMutex<Vec<Vec<PageStatsPayload>>>,
    }

    #[async_trait]
    impl HitSink for RecordingSink {
        async fn apply_hits(&self, payloads: Vec<PageStatsPayload>) -> AppResult<Vec<PageStats>> {
            self.calls.lock().unwrap().push(payloads.clone());
            Ok(payloads
                .into_iter()
                .map(|p| {
                    let mut stats = PageStats::new(p.page.clone(), 0);
                    stats.add_hits(p.batch_hits(), 0);
                    stats
                })
                .collect())
        }
    }

    fn page(x: u32) -> TilePage {
        let id = TileSet::new("roads", "EPSG:4326", "image/png", None).id();
        TilePage::new(id, x, 0, 3)
    }

    #[tokio::test]
    async fn test_queued_batches_are_coalesced_per_page() {
        let sink = Arc::new(RecordingSink::default());
        let writer = HitWriter::spawn(sink.clone(), 8, 8);

        let first = writer.submit(vec![
            PageStatsPayload::hits(page(0), 2, 0),
            PageStatsPayload::hits(page(1), 1, 0),
        ]);
        let second = writer.submit(vec![PageStatsPayload::hits(page(0), 3, 0)]);

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].num_hits, 5);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_batch() {
        let sink = Arc::new(RecordingSink::default());
        let writer = HitWriter::spawn(sink, 1, 1);

        let accepted = writer.submit(vec![PageStatsPayload::hits(page(0), 1, 0)]);
        let dropped = writer.submit(vec![PageStatsPayload::hits(page(1), 1, 0)]);

        assert!(dropped.await.is_err());
        assert_eq!(accepted.await.unwrap().len(), 1);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let writer = HitWriter::spawn(Arc::new(RecordingSink::default()), 4, 4);
        writer.shutdown().await;
        assert!(writer.is_shut_down());
        let result = writer
            .submit(vec![PageStatsPayload::hits(page(0), 1, 0)])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_submission_resolves_immediately() {
        let writer = HitWriter::spawn(Arc::new(RecordingSink::default()), 4, 4);
        assert!(writer.submit(Vec::new()).await.unwrap().is_empty());
        writer.shutdown().await;
    }
}
