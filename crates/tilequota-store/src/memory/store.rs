//! In-memory quota store.
//!
//! All counters and page statistics live behind one `RwLock`; every
//! mutation takes the write lock, so per-tile-set updates serialize and the
//! global counter always equals the sum of the tile-set counters.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use tilequota_core::clock::Clock;
use tilequota_core::config::StoreConfig;
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::types::{Quota, QuotaDelta, TileRange};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::ExpirationPolicy;
use tilequota_entity::stats::{PageStats, PageStatsPayload};
use tilequota_entity::tileset::{TileSet, TileSetId};

use crate::calculator::TilePageCalculator;
use crate::store::{QuotaStore, StatsFuture};
use crate::writer::{HitSink, HitWriter};

#[derive(Debug, Default)]
struct MemoryState {
    tile_sets: HashMap<TileSetId, Quota>,
    pages: HashMap<TilePage, PageStats>,
    global: Quota,
}

impl MemoryState {
    /// Remove the matching tile sets and their pages, returning the bytes
    /// they held.
    fn remove_tile_sets(&mut self, matches: impl Fn(&TileSetId) -> bool) -> Quota {
        let doomed: Vec<TileSetId> = self.tile_sets.keys().filter(|id| matches(id)).cloned().collect();
        if doomed.is_empty() {
            return Quota::ZERO;
        }

        let mut freed = Quota::ZERO;
        for id in &doomed {
            if let Some(bytes) = self.tile_sets.remove(id) {
                freed = freed.add(bytes);
            }
        }
        let doomed: BTreeSet<TileSetId> = doomed.into_iter().collect();
        self.pages.retain(|page, _| !doomed.contains(&page.tile_set_id));

        let (global, clamped) = self.global.subtract(freed);
        if clamped {
            let e = AppError::inconsistency(format!(
                "global quota holds {}, removed tile sets held {freed}",
                self.global
            ));
            warn!(error = %e, "Clamping global quota to zero");
        }
        self.global = global;
        freed
    }
}

#[derive(Debug)]
struct MemoryInner {
    state: RwLock<MemoryState>,
    calculator: TilePageCalculator,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl HitSink for MemoryInner {
    async fn apply_hits(&self, payloads: Vec<PageStatsPayload>) -> AppResult<Vec<PageStats>> {
        let now = self.clock.current_time_minutes();
        let mut state = self.state.write().await;
        let mut updated = Vec::with_capacity(payloads.len());

        for payload in payloads {
            if !state.tile_sets.contains_key(&payload.page.tile_set_id) {
                info!(
                    tile_set = %payload.page.tile_set_id,
                    "Ignoring hits for untracked tile set"
                );
                continue;
            }
            let capacity = self.calculator.page_capacity(&payload.page);
            let Some(stats) = state.pages.get_mut(&payload.page) else {
                trace!(page = %payload.page, "Ignoring hits for page without tiles");
                continue;
            };
            stats.add_hits(payload.batch_hits(), now);
            stats.update_fill_factor(capacity);
            updated.push(stats.clone());
        }
        Ok(updated)
    }
}

/// Quota store kept entirely in process memory.
#[derive(Debug)]
pub struct MemoryQuotaStore {
    inner: Arc<MemoryInner>,
    writer: HitWriter,
}

impl MemoryQuotaStore {
    /// Create an empty store and spawn its hit writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(calculator: TilePageCalculator, clock: Arc<dyn Clock>, config: &StoreConfig) -> Self {
        let inner = Arc::new(MemoryInner {
            state: RwLock::new(MemoryState::default()),
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

    /// The page calculator backing this store.
    pub fn calculator(&self) -> &TilePageCalculator {
        &self.inner.calculator
    }

    async fn delete_where(
        &self,
        what: &str,
        matches: impl Fn(&TileSetId) -> bool,
    ) -> AppResult<Quota> {
        let freed = self.inner.state.write().await.remove_tile_sets(matches);
        info!(scope = what, freed = %freed, "Deleted tile sets");
        Ok(freed)
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn start_up(&self) -> AppResult<()> {
        let calculator = &self.inner.calculator;
        let expected = calculator.expected_tile_sets();
        let mut state = self.inner.state.write().await;

        let stale: BTreeSet<TileSetId> = state
            .tile_sets
            .keys()
            .filter(|id| !expected.contains(id.tile_set()))
            .cloned()
            .collect();
        if !stale.is_empty() {
            info!(count = stale.len(), "Removing tile sets that are no longer configured");
            state.remove_tile_sets(|id| stale.contains(id));
        }

        let mut created = 0usize;
        for tile_set in expected {
            if let Entry::Vacant(entry) = state.tile_sets.entry(tile_set.id()) {
                entry.insert(Quota::ZERO);
                created += 1;
            }
        }

        let sum: Quota = state.tile_sets.values().copied().sum();
        if sum != state.global {
            warn!(
                recorded = %state.global,
                actual = %sum,
                "Global quota out of sync with tile sets, recomputing"
            );
            state.global = sum;
        }

        info!(
            tile_sets = state.tile_sets.len(),
            created,
            global = %state.global,
            "In-memory quota store started"
        );
        Ok(())
    }

    async fn destroy(&self) -> AppResult<()> {
        self.writer.shutdown().await;
        info!("In-memory quota store stopped");
        Ok(())
    }

    async fn create_layer(&self, layer_name: &str) -> AppResult<()> {
        let tile_sets = self.inner.calculator.tile_sets_for(layer_name);
        let mut state = self.inner.state.write().await;
        for tile_set in tile_sets {
            state.tile_sets.entry(tile_set.id()).or_insert(Quota::ZERO);
        }
        debug!(layer = layer_name, "Registered layer tile sets");
        Ok(())
    }

    async fn get_globally_used_quota(&self) -> AppResult<Quota> {
        Ok(self.inner.state.read().await.global)
    }

    async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota> {
        let state = self.inner.state.read().await;
        Ok(state
            .tile_sets
            .iter()
            .filter(|(id, _)| id.layer_name() == layer_name)
            .map(|(_, bytes)| *bytes)
            .sum())
    }

    async fn get_used_quota_by_tile_set_id(&self, id: &TileSetId) -> AppResult<Quota> {
        let state = self.inner.state.read().await;
        Ok(state.tile_sets.get(id).copied().unwrap_or(Quota::ZERO))
    }

    async fn get_tile_set_by_id(&self, id: &TileSetId) -> AppResult<TileSet> {
        let state = self.inner.state.read().await;
        state
            .tile_sets
            .get_key_value(id)
            .map(|(id, _)| id.tile_set().clone())
            .ok_or_else(|| AppError::not_found(format!("Tile set '{id}' not found")))
    }

    async fn get_tile_sets(&self) -> AppResult<BTreeSet<TileSet>> {
        let state = self.inner.state.read().await;
        Ok(state.tile_sets.keys().map(|id| id.tile_set().clone()).collect())
    }

    async fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        delta: QuotaDelta,
        payloads: Vec<PageStatsPayload>,
    ) -> AppResult<()> {
        let id = tile_set.id();
        let now = self.inner.clock.current_time_minutes();
        let mut state = self.inner.state.write().await;

        let current = match state.tile_sets.get(&id) {
            Some(bytes) => *bytes,
            None => {
                debug!(tile_set = %id, "Creating tile set on first update");
                Quota::ZERO
            }
        };
        let (updated, clamped) = current.apply(delta);
        if clamped {
            let e = AppError::inconsistency(format!(
                "tile set '{id}' holds {current}, cannot apply {delta}"
            ));
            warn!(error = %e, "Clamping tile set quota to zero");
        }
        state.tile_sets.insert(id.clone(), updated);

        // The global counter follows what the tile set actually moved by.
        let applied = updated.difference(current);
        let (global, clamped) = state.global.apply(applied);
        if clamped {
            let e = AppError::inconsistency(format!(
                "global quota holds {}, cannot apply {applied}",
                state.global
            ));
            warn!(error = %e, "Clamping global quota to zero");
        }
        state.global = global;

        for payload in payloads {
            if payload.num_tiles == 0 {
                continue;
            }
            let capacity = self.inner.calculator.page_capacity(&payload.page);
            match state.pages.entry(payload.page) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().add_tiles(payload.num_tiles, capacity);
                    if !entry.get().has_tiles() {
                        trace!(page = %entry.key(), "Page has no tiles left, dropping statistics");
                        entry.remove();
                    }
                }
                Entry::Vacant(entry) => {
                    if payload.num_tiles > 0 {
                        let mut stats = PageStats::new(entry.key().clone(), now);
                        stats.add_tiles(payload.num_tiles, capacity);
                        entry.insert(stats);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_hits_and_set_access_time(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture {
        self.writer.submit(payloads)
    }

    async fn get_page_stats(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        Ok(self.inner.state.read().await.pages.get(page).cloned())
    }

    async fn find_page_to_expire(
        &self,
        policy: &dyn ExpirationPolicy,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        let state = self.inner.state.read().await;
        Ok(state
            .pages
            .values()
            .filter(|s| s.has_tiles() && layer_names.contains(s.page.tile_set_id.layer_name()))
            .min_by(|a, b| policy.compare(a, b))
            .cloned())
    }

    async fn get_tiles_for_page(&self, page: &TilePage) -> AppResult<TileRange> {
        self.inner.calculator.to_tile_range(page)
    }

    async fn set_truncated(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        Ok(self.inner.state.write().await.pages.remove(page))
    }

    async fn delete_layer(&self, layer_name: &str) -> AppResult<Quota> {
        self.delete_where(layer_name, |id| id.layer_name() == layer_name)
            .await
    }

    async fn delete_gridset(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota> {
        self.delete_where(gridset_id, |id| {
            id.layer_name() == layer_name && id.gridset_id() == gridset_id
        })
        .await
    }

    async fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> AppResult<Quota> {
        self.delete_where(parameters_id, |id| {
            id.layer_name() == layer_name && id.parameters_id() == Some(parameters_id)
        })
        .await
    }

    async fn rename_layer(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        if old_name == new_name {
            return Ok(());
        }
        let mut state = self.inner.state.write().await;
        if state.tile_sets.keys().any(|id| id.layer_name() == new_name) {
            return Err(AppError::conflict(format!(
                "Cannot rename '{old_name}': layer '{new_name}' already has tile sets"
            )));
        }

        let moving: Vec<TileSetId> = state
            .tile_sets
            .keys()
            .filter(|id| id.layer_name() == old_name)
            .cloned()
            .collect();
        let mut renamed: HashMap<TileSetId, TileSetId> = HashMap::with_capacity(moving.len());
        for old_id in moving {
            if let Some(bytes) = state.tile_sets.remove(&old_id) {
                let new_id = old_id.tile_set().renamed(new_name).id();
                state.tile_sets.insert(new_id.clone(), bytes);
                renamed.insert(old_id, new_id);
            }
        }

        let pages: Vec<TilePage> = state
            .pages
            .keys()
            .filter(|page| renamed.contains_key(&page.tile_set_id))
            .cloned()
            .collect();
        for page in pages {
            if let (Some(mut stats), Some(new_id)) =
                (state.pages.remove(&page), renamed.get(&page.tile_set_id))
            {
                stats.page = page.with_tile_set(new_id.clone());
                state.pages.insert(stats.page.clone(), stats);
            }
        }

        info!(
            from = old_name,
            to = new_name,
            tile_sets = renamed.len(),
            "Renamed layer"
        );
        Ok(())
    }
}
