//! Quota store persisted in PostgreSQL.
//!
//! Every mutation runs in one transaction. Counter rows are locked with
//! `SELECT ... FOR UPDATE`, tile set rows first and the global row last,
//! so concurrent updates of one tile set serialize without deadlocking.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{debug, info, trace, warn};

use tilequota_core::clock::Clock;
use tilequota_core::config::StoreConfig;
use tilequota_core::error::{AppError, ErrorKind};
use tilequota_core::result::AppResult;
use tilequota_core::types::{Quota, QuotaDelta, TileRange};
use tilequota_database::DatabasePool;
use tilequota_database::repositories::{TilePageRepository, TileSetRepository};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::ExpirationPolicy;
use tilequota_entity::stats::{PageStats, PageStatsPayload};
use tilequota_entity::tileset::{TileSet, TileSetId};

use crate::calculator::TilePageCalculator;
use crate::store::{QuotaStore, StatsFuture};
use crate::writer::{HitSink, HitWriter};

#[derive(Debug)]
struct PgInner {
    db: DatabasePool,
    tile_sets: TileSetRepository,
    pages: TilePageRepository,
    calculator: TilePageCalculator,
    clock: Arc<dyn Clock>,
}

impl PgInner {
    /// Apply a signed delta to the global counter row.
    async fn adjust_global(&self, conn: &mut PgConnection, delta: QuotaDelta) -> AppResult<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let current = match self.tile_sets.lock_bytes(conn, TileSetId::GLOBAL_KEY).await? {
            Some(bytes) => bytes,
            None => {
                self.tile_sets.ensure_global(conn).await?;
                Quota::ZERO
            }
        };
        let (updated, clamped) = current.apply(delta);
        if clamped {
            let e = AppError::inconsistency(format!(
                "global quota holds {current}, cannot apply {delta}"
            ));
            warn!(error = %e, "Clamping global quota to zero");
        }
        self.tile_sets
            .set_bytes(conn, TileSetId::GLOBAL_KEY, updated)
            .await
    }

    /// Delete the tile sets of a layer accepted by `matches`, with their
    /// pages, and release their bytes from the global counter.
    async fn delete_matching(
        &self,
        layer_name: &str,
        matches: impl Fn(&TileSet) -> bool + Send,
    ) -> AppResult<Quota> {
        let mut tx = self.db.begin().await?;
        let rows = self.tile_sets.find_by_layer(&mut tx, layer_name).await?;

        let doomed: Vec<TileSetId> = rows
            .iter()
            .filter(|(ts, _)| matches(ts))
            .map(|(ts, _)| ts.id())
            .collect();

        let mut freed = Quota::ZERO;
        for id in &doomed {
            freed = freed.add(self.tile_sets.delete(&mut tx, id).await?);
        }
        self.adjust_global(&mut tx, -QuotaDelta::from(freed)).await?;
        commit(tx).await?;

        info!(layer = layer_name, tile_sets = doomed.len(), freed = %freed, "Deleted tile sets");
        Ok(freed)
    }
}

#[async_trait]
impl HitSink for PgInner {
    async fn apply_hits(&self, payloads: Vec<PageStatsPayload>) -> AppResult<Vec<PageStats>> {
        let now = self.clock.current_time_minutes();
        let mut tracked: HashMap<TileSetId, bool> = HashMap::new();
        let mut tx = self.db.begin().await?;
        let mut updated = Vec::with_capacity(payloads.len());

        for payload in payloads {
            let id = &payload.page.tile_set_id;
            let known = match tracked.get(id) {
                Some(known) => *known,
                None => {
                    let known = self.tile_sets.find_by_id(id).await?.is_some();
                    tracked.insert(id.clone(), known);
                    known
                }
            };
            if !known {
                info!(tile_set = %id, "Ignoring hits for untracked tile set");
                continue;
            }

            let Some(mut stats) = self.pages.lock(&mut tx, &payload.page).await? else {
                trace!(page = %payload.page, "Ignoring hits for page without tiles");
                continue;
            };
            stats.add_hits(payload.batch_hits(), now);
            stats.update_fill_factor(self.calculator.page_capacity(&payload.page));
            self.pages.upsert(&mut tx, &stats).await?;
            updated.push(stats);
        }

        commit(tx).await?;
        Ok(updated)
    }
}

/// Quota store backed by the `tileset` and `tilepage` tables.
#[derive(Debug)]
pub struct PgQuotaStore {
    inner: Arc<PgInner>,
    writer: HitWriter,
}

impl PgQuotaStore {
    /// Create a store over an existing pool and spawn its hit writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        db: DatabasePool,
        calculator: TilePageCalculator,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Self {
        let pool = db.pool().clone();
        let inner = Arc::new(PgInner {
            tile_sets: TileSetRepository::new(pool.clone()),
            pages: TilePageRepository::new(pool),
            db,
            calculator,
            clock,
        });
        let writer = HitWriter::spawn(
            inner.clone(),
            config.hit_queue_capacity,
            config.hit_batch_limit,
        );
        Self { inner, writer }
    }

    /// The underlying pool.
    pub fn database(&self) -> &DatabasePool {
        &self.inner.db
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn start_up(&self) -> AppResult<()> {
        let inner = &self.inner;
        let expected = inner.calculator.expected_tile_sets();
        let existing = inner.tile_sets.find_all().await?;

        let mut tx = inner.db.begin().await?;
        inner.tile_sets.ensure_global(&mut tx).await?;

        let mut removed = 0usize;
        for tile_set in existing.iter().filter(|ts| !expected.contains(*ts)) {
            let freed = inner.tile_sets.delete(&mut tx, &tile_set.id()).await?;
            debug!(tile_set = %tile_set, freed = %freed, "Removed unconfigured tile set");
            removed += 1;
        }

        let mut created = 0usize;
        for tile_set in &expected {
            if inner.tile_sets.insert_if_absent(&mut tx, tile_set, Quota::ZERO).await? {
                created += 1;
            }
        }

        let recorded = inner
            .tile_sets
            .lock_bytes(&mut tx, TileSetId::GLOBAL_KEY)
            .await?
            .unwrap_or(Quota::ZERO);
        let actual = inner.tile_sets.sum_all(&mut tx).await?;
        if recorded != actual {
            warn!(
                recorded = %recorded,
                actual = %actual,
                "Global quota out of sync with tile sets, recomputing"
            );
            inner
                .tile_sets
                .set_bytes(&mut tx, TileSetId::GLOBAL_KEY, actual)
                .await?;
        }
        commit(tx).await?;

        info!(removed, created, global = %actual, "PostgreSQL quota store started");
        Ok(())
    }

    async fn destroy(&self) -> AppResult<()> {
        self.writer.shutdown().await;
        self.inner.db.close().await;
        info!("PostgreSQL quota store stopped");
        Ok(())
    }

    async fn create_layer(&self, layer_name: &str) -> AppResult<()> {
        let tile_sets = self.inner.calculator.tile_sets_for(layer_name);
        let mut tx = self.inner.db.begin().await?;
        for tile_set in &tile_sets {
            self.inner
                .tile_sets
                .insert_if_absent(&mut tx, tile_set, Quota::ZERO)
                .await?;
        }
        commit(tx).await?;
        debug!(layer = layer_name, tile_sets = tile_sets.len(), "Registered layer tile sets");
        Ok(())
    }

    async fn get_globally_used_quota(&self) -> AppResult<Quota> {
        self.inner.tile_sets.used_by_key(TileSetId::GLOBAL_KEY).await
    }

    async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.tile_sets.used_by_layer(layer_name).await
    }

    async fn get_used_quota_by_tile_set_id(&self, id: &TileSetId) -> AppResult<Quota> {
        self.inner.tile_sets.used_by_key(&id.key()).await
    }

    async fn get_tile_set_by_id(&self, id: &TileSetId) -> AppResult<TileSet> {
        self.inner
            .tile_sets
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Tile set '{id}' not found")))
    }

    async fn get_tile_sets(&self) -> AppResult<BTreeSet<TileSet>> {
        Ok(self.inner.tile_sets.find_all().await?.into_iter().collect())
    }

    async fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        delta: QuotaDelta,
        payloads: Vec<PageStatsPayload>,
    ) -> AppResult<()> {
        let inner = &self.inner;
        let id = tile_set.id();
        let key = id.key();
        let now = inner.clock.current_time_minutes();
        let mut tx = inner.db.begin().await?;

        if inner.tile_sets.insert_if_absent(&mut tx, tile_set, Quota::ZERO).await? {
            debug!(tile_set = %id, "Creating tile set on first update");
        }
        let current = inner
            .tile_sets
            .lock_bytes(&mut tx, &key)
            .await?
            .unwrap_or(Quota::ZERO);
        let (updated, clamped) = current.apply(delta);
        if clamped {
            let e = AppError::inconsistency(format!(
                "tile set '{id}' holds {current}, cannot apply {delta}"
            ));
            warn!(error = %e, "Clamping tile set quota to zero");
        }
        inner.tile_sets.set_bytes(&mut tx, &key, updated).await?;
        // The global counter follows what the tile set actually moved by.
        inner.adjust_global(&mut tx, updated.difference(current)).await?;

        for payload in payloads.into_iter().filter(|p| p.num_tiles != 0) {
            let capacity = inner.calculator.page_capacity(&payload.page);
            let existing = inner.pages.lock(&mut tx, &payload.page).await?;
            match existing {
                Some(mut stats) => {
                    stats.add_tiles(payload.num_tiles, capacity);
                    if stats.has_tiles() {
                        inner.pages.upsert(&mut tx, &stats).await?;
                    } else {
                        trace!(page = %stats.page, "Page has no tiles left, dropping statistics");
                        inner.pages.delete(&mut tx, &stats.page).await?;
                    }
                }
                None if payload.num_tiles > 0 => {
                    let mut stats = PageStats::new(payload.page, now);
                    stats.add_tiles(payload.num_tiles, capacity);
                    inner.pages.upsert(&mut tx, &stats).await?;
                }
                None => {}
            }
        }

        commit(tx).await
    }

    fn add_hits_and_set_access_time(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture {
        self.writer.submit(payloads)
    }

    async fn get_page_stats(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        self.inner.pages.find(page).await
    }

    async fn find_page_to_expire(
        &self,
        policy: &dyn ExpirationPolicy,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        if layer_names.is_empty() {
            return Ok(None);
        }
        let layers: Vec<String> = layer_names.iter().cloned().collect();
        self.inner.pages.find_candidate(policy.kind(), &layers).await
    }

    async fn get_tiles_for_page(&self, page: &TilePage) -> AppResult<TileRange> {
        self.inner.calculator.to_tile_range(page)
    }

    async fn set_truncated(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        let mut tx = self.inner.db.begin().await?;
        let stats = self.inner.pages.lock(&mut tx, page).await?;
        if stats.is_some() {
            self.inner.pages.delete(&mut tx, page).await?;
        }
        commit(tx).await?;
        Ok(stats)
    }

    async fn delete_layer(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.delete_matching(layer_name, |_| true).await
    }

    async fn delete_gridset(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota> {
        self.inner
            .delete_matching(layer_name, |ts| ts.gridset_id == gridset_id)
            .await
    }

    async fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> AppResult<Quota> {
        self.inner
            .delete_matching(layer_name, |ts| {
                ts.parameters_id.as_deref() == Some(parameters_id)
            })
            .await
    }

    async fn rename_layer(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        if old_name == new_name {
            return Ok(());
        }
        let inner = &self.inner;
        let mut tx = inner.db.begin().await?;

        if !inner.tile_sets.find_by_layer(&mut tx, new_name).await?.is_empty() {
            return Err(AppError::conflict(format!(
                "Cannot rename '{old_name}': layer '{new_name}' already has tile sets"
            )));
        }

        let rows = inner.tile_sets.find_by_layer(&mut tx, old_name).await?;
        let mut pages_moved = 0u64;
        for (tile_set, bytes) in &rows {
            let old_id = tile_set.id();
            let new_id = tile_set.renamed(new_name).id();
            inner
                .tile_sets
                .insert_if_absent(&mut tx, new_id.tile_set(), *bytes)
                .await?;
            pages_moved += inner.pages.reassign(&mut tx, &old_id, &new_id).await?;
            inner.tile_sets.delete(&mut tx, &old_id).await?;
        }
        commit(tx).await?;

        info!(
            from = old_name,
            to = new_name,
            tile_sets = rows.len(),
            pages = pages_moved,
            "Renamed layer"
        );
        Ok(())
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
    tx.commit()
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to commit transaction", e))
}
