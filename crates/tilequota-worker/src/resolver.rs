//! Quota resolvers: where an eviction cycle reads its limit, usage and
//! policy from.
//!
//! Resolvers read the live configuration on every call, so an administrative
//! change takes effect on the next iteration of a running cycle.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tilequota_core::config::DiskQuotaConfig;
use tilequota_core::result::AppResult;
use tilequota_core::types::Quota;
use tilequota_store::QuotaStore;

/// What an eviction cycle is enforcing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CycleTarget {
    /// A layer with its own quota.
    Layer(String),
    /// The global quota shared by every layer without its own quota.
    Global,
}

impl fmt::Display for CycleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layer(name) => write!(f, "layer '{name}'"),
            Self::Global => f.write_str("global quota"),
        }
    }
}

/// Limit, usage and policy of one quota.
#[async_trait]
pub trait QuotaResolver: Send + Sync + fmt::Debug {
    /// The quota being resolved.
    fn target(&self) -> &CycleTarget;

    /// Current limit, `None` if the quota was removed.
    async fn limit(&self) -> Option<Quota>;

    /// Bytes currently used.
    async fn used(&self) -> AppResult<Quota>;

    /// Expiration policy name, `None` if no policy applies.
    async fn policy_name(&self) -> Option<String>;

    /// Layers eligible for eviction.
    async fn layer_names(&self) -> AppResult<BTreeSet<String>>;
}

/// Resolves the explicit quota of one layer.
#[derive(Debug, Clone)]
pub struct LayerQuotaResolver {
    target: CycleTarget,
    layer: String,
    config: Arc<RwLock<DiskQuotaConfig>>,
    store: Arc<dyn QuotaStore>,
}

impl LayerQuotaResolver {
    pub fn new(
        layer: impl Into<String>,
        config: Arc<RwLock<DiskQuotaConfig>>,
        store: Arc<dyn QuotaStore>,
    ) -> Self {
        let layer = layer.into();
        Self {
            target: CycleTarget::Layer(layer.clone()),
            layer,
            config,
            store,
        }
    }
}

#[async_trait]
impl QuotaResolver for LayerQuotaResolver {
    fn target(&self) -> &CycleTarget {
        &self.target
    }

    async fn limit(&self) -> Option<Quota> {
        self.config
            .read()
            .await
            .layer_quota(&self.layer)
            .and_then(|lq| lq.quota)
    }

    async fn used(&self) -> AppResult<Quota> {
        self.store.get_used_quota_by_layer_name(&self.layer).await
    }

    async fn policy_name(&self) -> Option<String> {
        self.config.read().await.policy_for_layer(&self.layer)
    }

    async fn layer_names(&self) -> AppResult<BTreeSet<String>> {
        Ok(BTreeSet::from([self.layer.clone()]))
    }
}

/// Resolves the global quota.
///
/// Usage counts every tile set; eviction is restricted to layers without an
/// explicit limit of their own.
#[derive(Debug, Clone)]
pub struct GlobalQuotaResolver {
    target: CycleTarget,
    config: Arc<RwLock<DiskQuotaConfig>>,
    store: Arc<dyn QuotaStore>,
}

impl GlobalQuotaResolver {
    pub fn new(config: Arc<RwLock<DiskQuotaConfig>>, store: Arc<dyn QuotaStore>) -> Self {
        Self {
            target: CycleTarget::Global,
            config,
            store,
        }
    }
}

/// Layers tracked by the store that have no explicit limit.
pub async fn globally_governed_layers(
    config: &DiskQuotaConfig,
    store: &dyn QuotaStore,
) -> AppResult<BTreeSet<String>> {
    let explicit: BTreeSet<&str> = config
        .layer_quotas
        .iter()
        .filter(|lq| lq.quota.is_some())
        .map(|lq| lq.layer.as_str())
        .collect();
    Ok(store
        .get_tile_sets()
        .await?
        .into_iter()
        .map(|ts| ts.layer_name)
        .filter(|layer| !explicit.contains(layer.as_str()))
        .collect())
}

#[async_trait]
impl QuotaResolver for GlobalQuotaResolver {
    fn target(&self) -> &CycleTarget {
        &self.target
    }

    async fn limit(&self) -> Option<Quota> {
        self.config.read().await.global_quota
    }

    async fn used(&self) -> AppResult<Quota> {
        self.store.get_globally_used_quota().await
    }

    async fn policy_name(&self) -> Option<String> {
        self.config.read().await.global_expiration_policy_name.clone()
    }

    async fn layer_names(&self) -> AppResult<BTreeSet<String>> {
        let config = self.config.read().await.clone();
        globally_governed_layers(&config, self.store.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilequota_core::config::LayerQuota;
    use tilequota_core::types::QuotaDelta;
    use tilequota_entity::tileset::TileSet;
    use tilequota_store::memory::MemoryQuotaStore;
    use tilequota_store::TilePageCalculator;

    #[derive(Debug)]
    struct NoLayers;

    impl tilequota_core::traits::LayerCatalog for NoLayers {
        fn layer_names(&self) -> BTreeSet<String> {
            BTreeSet::new()
        }

        fn layer(&self, _name: &str) -> Option<tilequota_core::types::LayerInfo> {
            None
        }

        fn cached_parameter_ids(&self, _name: &str) -> BTreeSet<String> {
            BTreeSet::new()
        }

        fn generation(&self) -> u64 {
            0
        }
    }

    async fn store_with(layers: &[(&str, i64)]) -> Arc<dyn QuotaStore> {
        let calculator = TilePageCalculator::new(Arc::new(NoLayers), Default::default());
        let store = MemoryQuotaStore::new(
            calculator,
            Arc::new(tilequota_core::clock::ManualClock::at_minute(1)),
            &Default::default(),
        );
        for (layer, bytes) in layers {
            let ts = TileSet::new(*layer, "EPSG:4326", "image/png", None);
            store
                .add_to_quota_and_tile_counts(&ts, QuotaDelta::from(*bytes), Vec::new())
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_layer_resolver_reads_live_config() {
        let store = store_with(&[("roads", 300), ("rivers", 50)]).await;
        let config = Arc::new(RwLock::new(DiskQuotaConfig {
            layer_quotas: vec![LayerQuota::new("roads", "LRU", Quota::from_bytes(100))],
            ..Default::default()
        }));
        let resolver = LayerQuotaResolver::new("roads", config.clone(), store);

        assert_eq!(resolver.limit().await, Some(Quota::from_bytes(100)));
        assert_eq!(resolver.used().await.unwrap(), Quota::from_bytes(300));
        assert_eq!(resolver.policy_name().await.as_deref(), Some("LRU"));

        config.write().await.layer_quotas.clear();
        assert_eq!(resolver.limit().await, None);
        assert_eq!(resolver.policy_name().await.as_deref(), Some("LFU"));
    }

    #[tokio::test]
    async fn test_global_resolver_excludes_layers_with_own_limit() {
        let store = store_with(&[("roads", 300), ("rivers", 50), ("lakes", 10)]).await;
        let config = Arc::new(RwLock::new(DiskQuotaConfig {
            global_quota: Some(Quota::from_bytes(200)),
            layer_quotas: vec![
                LayerQuota::new("roads", "LRU", Quota::from_bytes(100)),
                LayerQuota {
                    layer: "lakes".into(),
                    expiration_policy_name: Some("LRU".into()),
                    quota: None,
                },
            ],
            ..Default::default()
        }));
        let resolver = GlobalQuotaResolver::new(config, store);

        assert_eq!(resolver.target(), &CycleTarget::Global);
        assert_eq!(resolver.used().await.unwrap(), Quota::from_bytes(360));
        assert_eq!(
            resolver.layer_names().await.unwrap(),
            BTreeSet::from(["lakes".to_string(), "rivers".to_string()])
        );
    }
}
