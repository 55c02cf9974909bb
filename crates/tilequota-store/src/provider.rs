//! Quota store manager that dispatches to the configured provider.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tilequota_core::clock::Clock;
use tilequota_core::config::{DatabaseConfig, StoreConfig};
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::types::{Quota, QuotaDelta, TileRange};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::ExpirationPolicy;
use tilequota_entity::stats::{PageStats, PageStatsPayload};
use tilequota_entity::tileset::{TileSet, TileSetId};

use crate::calculator::TilePageCalculator;
use crate::store::{QuotaStore, StatsFuture};

/// Quota store wrapper selected from configuration.
#[derive(Debug, Clone)]
pub struct QuotaStoreManager {
    /// The inner store.
    inner: Arc<dyn QuotaStore>,
}

impl QuotaStoreManager {
    /// Create the configured store. The `postgres` provider connects and
    /// applies pending migrations first.
    pub async fn new(
        config: &StoreConfig,
        #[allow(unused_variables)] database: &DatabaseConfig,
        calculator: TilePageCalculator,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let inner: Arc<dyn QuotaStore> = match config.provider.as_str() {
            #[cfg(feature = "postgres")]
            "postgres" => {
                info!("Initializing PostgreSQL quota store");
                let db = tilequota_database::DatabasePool::connect(database).await?;
                tilequota_database::migration::run_migrations(db.pool()).await?;
                Arc::new(crate::postgres::PgQuotaStore::new(
                    db, calculator, clock, config,
                ))
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory quota store");
                Arc::new(crate::memory::MemoryQuotaStore::new(calculator, clock, config))
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown quota store provider: '{other}'. Supported: memory, postgres"
                )));
            }
        };

        Ok(Self { inner })
    }

    /// Wrap an existing store (for testing).
    pub fn from_store(store: Arc<dyn QuotaStore>) -> Self {
        Self { inner: store }
    }

    /// Get a reference to the inner store.
    pub fn store(&self) -> &dyn QuotaStore {
        self.inner.as_ref()
    }
}

#[async_trait]
impl QuotaStore for QuotaStoreManager {
    async fn start_up(&self) -> AppResult<()> {
        self.inner.start_up().await
    }

    async fn destroy(&self) -> AppResult<()> {
        self.inner.destroy().await
    }

    async fn create_layer(&self, layer_name: &str) -> AppResult<()> {
        self.inner.create_layer(layer_name).await
    }

    async fn get_globally_used_quota(&self) -> AppResult<Quota> {
        self.inner.get_globally_used_quota().await
    }

    async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.get_used_quota_by_layer_name(layer_name).await
    }

    async fn get_used_quota_by_tile_set_id(&self, id: &TileSetId) -> AppResult<Quota> {
        self.inner.get_used_quota_by_tile_set_id(id).await
    }

    async fn get_tile_set_by_id(&self, id: &TileSetId) -> AppResult<TileSet> {
        self.inner.get_tile_set_by_id(id).await
    }

    async fn get_tile_sets(&self) -> AppResult<BTreeSet<TileSet>> {
        self.inner.get_tile_sets().await
    }

    async fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        delta: QuotaDelta,
        payloads: Vec<PageStatsPayload>,
    ) -> AppResult<()> {
        self.inner
            .add_to_quota_and_tile_counts(tile_set, delta, payloads)
            .await
    }

    fn add_hits_and_set_access_time(&self, payloads: Vec<PageStatsPayload>) -> StatsFuture {
        self.inner.add_hits_and_set_access_time(payloads)
    }

    async fn get_page_stats(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        self.inner.get_page_stats(page).await
    }

    async fn find_page_to_expire(
        &self,
        policy: &dyn ExpirationPolicy,
        layer_names: &BTreeSet<String>,
    ) -> AppResult<Option<PageStats>> {
        self.inner.find_page_to_expire(policy, layer_names).await
    }

    async fn get_tiles_for_page(&self, page: &TilePage) -> AppResult<TileRange> {
        self.inner.get_tiles_for_page(page).await
    }

    async fn set_truncated(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        self.inner.set_truncated(page).await
    }

    async fn delete_layer(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.delete_layer(layer_name).await
    }

    async fn delete_gridset(&self, layer_name: &str, gridset_id: &str) -> AppResult<Quota> {
        self.inner.delete_gridset(layer_name, gridset_id).await
    }

    async fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> AppResult<Quota> {
        self.inner.delete_parameters(layer_name, parameters_id).await
    }

    async fn rename_layer(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        self.inner.rename_layer(old_name, new_name).await
    }
}
