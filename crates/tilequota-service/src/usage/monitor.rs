//! Producer API and consumer task for tile hit events.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use tilequota_core::clock::Clock;
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_entity::event::UsageStats;
use tilequota_entity::page::TilePage;
use tilequota_entity::stats::PageStatsPayload;
use tilequota_entity::tileset::TileSet;
use tilequota_store::{QuotaStore, TilePageCalculator};

use crate::consumer::{AggregationConfig, ConsumerHandle};

#[derive(Debug)]
enum UsageEvent {
    Hit(UsageStats),
    Flush(oneshot::Sender<()>),
}

/// Collects tile hits, coalesces them per page and hands them to the
/// quota store's hit writer.
///
/// Reporting a hit never blocks the request path: when the queue is full
/// the hit is dropped.
#[derive(Debug)]
pub struct UsageStatsMonitor {
    calculator: TilePageCalculator,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<UsageEvent>,
    consumer: ConsumerHandle,
}

impl UsageStatsMonitor {
    /// Spawn the consumer task. Must be called from within a Tokio runtime.
    pub fn start(
        store: Arc<dyn QuotaStore>,
        calculator: TilePageCalculator,
        clock: Arc<dyn Clock>,
        aggregation: AggregationConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(aggregation.queue_capacity.max(1));
        let consumer = ConsumerHandle::spawn("usage-stats", move |cancel| {
            consume(store, rx, cancel, aggregation)
        });
        Self {
            calculator,
            clock,
            tx,
            consumer,
        }
    }

    /// A tile was served from the cache. Returns `false` if the hit was
    /// dropped.
    pub fn tile_requested(&self, tile_set: &TileSet, x: u64, y: u64, z: u8) -> bool {
        let page = self.calculator.tile_to_page(&tile_set.id(), x, y, z);
        let event = UsageEvent::Hit(UsageStats {
            page,
            hits: 1,
            access_time_millis: self.clock.now_millis(),
        });
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(tile_set = %tile_set, "Usage queue full, dropping hit");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Hand everything queued so far to the store.
    pub async fn flush(&self) -> AppResult<()> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(UsageEvent::Flush(done))
            .await
            .map_err(|_| AppError::service_unavailable("Usage consumer is shut down"))?;
        wait.await
            .map_err(|_| AppError::service_unavailable("Usage consumer stopped before flushing"))
    }

    /// Whether the consumer is accepting hits.
    pub fn is_running(&self) -> bool {
        self.consumer.is_running()
    }

    /// Stop the consumer after handing pending hits to the store.
    pub async fn shutdown(&self) {
        self.consumer.shutdown().await;
    }
}

async fn consume(
    store: Arc<dyn QuotaStore>,
    mut rx: mpsc::Receiver<UsageEvent>,
    cancel: CancellationToken,
    aggregation: AggregationConfig,
) {
    let mut pending: HashMap<TilePage, PageStatsPayload> = HashMap::new();
    let mut aggregated = 0usize;
    let mut ticker = tokio::time::interval(aggregation.commit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(UsageEvent::Hit(hit)) => {
                    aggregate(&mut pending, hit);
                    aggregated += 1;
                    if aggregated >= aggregation.max_aggregates {
                        commit(store.as_ref(), &mut pending);
                        aggregated = 0;
                    }
                }
                Some(UsageEvent::Flush(done)) => {
                    commit(store.as_ref(), &mut pending);
                    aggregated = 0;
                    let _ = done.send(());
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    commit(store.as_ref(), &mut pending);
                    aggregated = 0;
                }
            }
        }
    }

    rx.close();
    let mut waiters = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            UsageEvent::Hit(hit) => aggregate(&mut pending, hit),
            UsageEvent::Flush(done) => waiters.push(done),
        }
    }
    commit(store.as_ref(), &mut pending);
    for done in waiters {
        let _ = done.send(());
    }
    info!("Usage stats consumer stopped");
}

fn aggregate(pending: &mut HashMap<TilePage, PageStatsPayload>, hit: UsageStats) {
    let incoming = PageStatsPayload::hits(hit.page, hit.hits, hit.access_time_millis);
    match pending.get_mut(&incoming.page) {
        Some(existing) => existing.merge(&incoming),
        None => {
            pending.insert(incoming.page.clone(), incoming);
        }
    }
}

fn commit(store: &dyn QuotaStore, pending: &mut HashMap<TilePage, PageStatsPayload>) {
    if pending.is_empty() {
        return;
    }
    let payloads: Vec<PageStatsPayload> = pending.drain().map(|(_, p)| p).collect();
    debug!(pages = payloads.len(), "Submitting page hits");
    // The batch is queued on submission; the result is not awaited.
    drop(store.add_hits_and_set_access_time(payloads));
}
