//! Producer API and consumer task for tile stored/deleted events.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::types::{Quota, QuotaDelta};
use tilequota_entity::event::QuotaUpdate;
use tilequota_entity::tileset::TileSet;
use tilequota_store::{QuotaStore, TilePageCalculator};

use super::aggregate::TileSetAggregate;
use crate::consumer::{AggregationConfig, ConsumerHandle};

#[derive(Debug)]
enum QuotaEvent {
    Update(QuotaUpdate),
    Flush(oneshot::Sender<AppResult<()>>),
}

/// Receives tile storage events, aggregates them per tile set and commits
/// them to the quota store in batches.
///
/// Sizes are rounded up to the disk block size before they are counted.
#[derive(Debug)]
pub struct QuotaUpdatesMonitor {
    store: Arc<dyn QuotaStore>,
    calculator: TilePageCalculator,
    disk_block_size: u64,
    tx: mpsc::Sender<QuotaEvent>,
    consumer: ConsumerHandle,
}

impl QuotaUpdatesMonitor {
    /// Spawn the consumer task. Must be called from within a Tokio runtime.
    pub fn start(
        store: Arc<dyn QuotaStore>,
        calculator: TilePageCalculator,
        disk_block_size: u64,
        aggregation: AggregationConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(aggregation.queue_capacity.max(1));
        let consumer_store = store.clone();
        let consumer = ConsumerHandle::spawn("quota-updates", move |cancel| {
            consume(consumer_store, rx, cancel, aggregation)
        });
        Self {
            store,
            calculator,
            disk_block_size: disk_block_size.max(1),
            tx,
            consumer,
        }
    }

    /// Bytes a tile of `size` occupies on disk.
    pub fn round_to_block(&self, size: u64) -> u64 {
        size.div_ceil(self.disk_block_size)
            .saturating_mul(self.disk_block_size)
    }

    fn block_delta(&self, size: u64) -> i64 {
        i64::try_from(self.round_to_block(size)).unwrap_or(i64::MAX)
    }

    /// A new tile of `size` bytes was written.
    pub async fn tile_stored(
        &self,
        tile_set: &TileSet,
        x: u64,
        y: u64,
        z: u8,
        size: u64,
    ) -> AppResult<()> {
        self.enqueue(tile_set, x, y, z, self.block_delta(size), 1).await
    }

    /// A tile of `size` bytes was removed.
    pub async fn tile_deleted(
        &self,
        tile_set: &TileSet,
        x: u64,
        y: u64,
        z: u8,
        size: u64,
    ) -> AppResult<()> {
        self.enqueue(tile_set, x, y, z, -self.block_delta(size), -1)
            .await
    }

    /// An existing tile was overwritten.
    pub async fn tile_updated(
        &self,
        tile_set: &TileSet,
        x: u64,
        y: u64,
        z: u8,
        new_size: u64,
        old_size: u64,
    ) -> AppResult<()> {
        let delta = self.block_delta(new_size) - self.block_delta(old_size);
        self.enqueue(tile_set, x, y, z, delta, 0).await
    }

    async fn enqueue(
        &self,
        tile_set: &TileSet,
        x: u64,
        y: u64,
        z: u8,
        size_delta: i64,
        tile_delta: i64,
    ) -> AppResult<()> {
        let page = self.calculator.tile_to_page(&tile_set.id(), x, y, z);
        trace!(page = %page, size_delta, tile_delta, "Queueing quota update");
        let update = QuotaUpdate {
            tile_set: tile_set.clone(),
            page,
            size_delta,
            tile_delta,
        };
        self.tx
            .send(QuotaEvent::Update(update))
            .await
            .map_err(|_| AppError::service_unavailable("Quota update consumer is shut down"))
    }

    /// Commit everything queued so far and wait for the commit.
    ///
    /// Fails when some updates could not be written; they stay queued and
    /// are retried on the next commit.
    pub async fn flush(&self) -> AppResult<()> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(QuotaEvent::Flush(done))
            .await
            .map_err(|_| AppError::service_unavailable("Quota update consumer is shut down"))?;
        wait.await
            .map_err(|_| AppError::service_unavailable("Quota update consumer stopped before flushing"))?
    }

    /// A layer was removed from the cache.
    ///
    /// Pending updates are committed first so they cannot resurrect the
    /// layer's tile sets.
    pub async fn layer_deleted(&self, layer_name: &str) -> AppResult<Quota> {
        self.flush().await?;
        self.store.delete_layer(layer_name).await
    }

    /// A gridset was removed from a layer.
    pub async fn gridset_deleted(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota> {
        self.flush().await?;
        self.store.delete_gridset(layer_name, gridset_id).await
    }

    /// The cached tiles of a parameter variant were removed.
    pub async fn parameters_deleted(
        &self,
        layer_name: &str,
        parameters_id: &str,
    ) -> AppResult<Quota> {
        self.flush().await?;
        self.store.delete_parameters(layer_name, parameters_id).await
    }

    /// A layer was renamed.
    pub async fn layer_renamed(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        self.flush().await?;
        self.store.rename_layer(old_name, new_name).await
    }

    /// Whether the consumer is accepting events.
    pub fn is_running(&self) -> bool {
        self.consumer.is_running()
    }

    /// Stop the consumer after committing pending updates.
    pub async fn shutdown(&self) {
        self.consumer.shutdown().await;
    }
}

async fn consume(
    store: Arc<dyn QuotaStore>,
    mut rx: mpsc::Receiver<QuotaEvent>,
    cancel: CancellationToken,
    aggregation: AggregationConfig,
) {
    let mut pending: HashMap<TileSet, TileSetAggregate> = HashMap::new();
    let mut aggregated = 0usize;
    let mut ticker = tokio::time::interval(aggregation.commit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(QuotaEvent::Update(update)) => {
                    pending.entry(update.tile_set.clone()).or_default().add(&update);
                    aggregated += 1;
                    if aggregated >= aggregation.max_aggregates {
                        let _ = commit(store.as_ref(), &mut pending).await;
                        aggregated = 0;
                    }
                }
                Some(QuotaEvent::Flush(done)) => {
                    let result = commit(store.as_ref(), &mut pending).await;
                    aggregated = 0;
                    let _ = done.send(result);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    let _ = commit(store.as_ref(), &mut pending).await;
                    aggregated = 0;
                }
            }
        }
    }

    rx.close();
    let mut waiters = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            QuotaEvent::Update(update) => {
                pending.entry(update.tile_set.clone()).or_default().add(&update);
            }
            QuotaEvent::Flush(done) => waiters.push(done),
        }
    }
    let result = commit(store.as_ref(), &mut pending).await;
    if !pending.is_empty() {
        error!(tile_sets = pending.len(), "Quota updates lost at shutdown");
    }
    for done in waiters {
        let _ = done.send(result.clone());
    }
    info!("Quota update consumer stopped");
}

/// Write every pending aggregate. Aggregates the store rejects are put
/// back into `pending` for the next commit.
async fn commit(
    store: &dyn QuotaStore,
    pending: &mut HashMap<TileSet, TileSetAggregate>,
) -> Result<(), AppError> {
    if pending.is_empty() {
        return Ok(());
    }
    debug!(tile_sets = pending.len(), "Committing quota updates");
    let batch: Vec<(TileSet, TileSetAggregate)> = pending.drain().collect();
    for (tile_set, aggregate) in batch {
        let delta: QuotaDelta = aggregate.bytes;
        if let Err(e) = store
            .add_to_quota_and_tile_counts(&tile_set, delta, aggregate.payloads())
            .await
        {
            error!(
                tile_set = %tile_set,
                delta = %delta,
                error = %e,
                "Failed to commit quota update, keeping it for the next commit"
            );
            pending.insert(tile_set, aggregate);
        }
    }

    if pending.is_empty() {
        Ok(())
    } else {
        Err(AppError::service_unavailable(format!(
            "{} tile set update(s) could not be committed",
            pending.len()
        )))
    }
}
