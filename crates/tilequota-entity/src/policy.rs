//! Expiration policies and the registry that resolves them by name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;

use crate::stats::PageStats;

/// The statistic a policy ranks by, so persistent stores can push the
/// ordering down into an indexed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Oldest `last_access_time_minutes` first.
    LeastRecentlyUsed,
    /// Lowest `num_hits` first.
    LeastFrequentlyUsed,
}

/// Ranks pages from least to most valuable.
///
/// `compare` must be a total order: two distinct pages never compare equal.
/// Ranking never mutates the statistics.
pub trait ExpirationPolicy: Send + Sync + fmt::Debug {
    /// Registry name, e.g. `LRU`.
    fn name(&self) -> &str;

    /// The ranking statistic.
    fn kind(&self) -> PolicyKind;

    /// Order two pages, least valuable first.
    fn compare(&self, a: &PageStats, b: &PageStats) -> Ordering {
        let primary = match self.kind() {
            PolicyKind::LeastRecentlyUsed => a
                .last_access_time_minutes
                .cmp(&b.last_access_time_minutes),
            PolicyKind::LeastFrequentlyUsed => a.num_hits.cmp(&b.num_hits),
        };
        primary.then_with(|| tie_break(a, b))
    }

    /// Sort candidates, least valuable first.
    fn rank(&self, pages: &[PageStats]) -> Vec<PageStats> {
        let mut ranked = pages.to_vec();
        ranked.sort_by(|a, b| self.compare(a, b));
        ranked
    }
}

/// Among equally valued pages, the more detailed (higher zoom) one goes
/// first; remaining ties fall back to page identity.
pub fn tie_break(a: &PageStats, b: &PageStats) -> Ordering {
    b.page
        .zoom_level
        .cmp(&a.page.zoom_level)
        .then_with(|| a.page.cmp(&b.page))
}

/// Least recently used.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lru;

impl ExpirationPolicy for Lru {
    fn name(&self) -> &str {
        "LRU"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::LeastRecentlyUsed
    }
}

/// Least frequently used.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lfu;

impl ExpirationPolicy for Lfu {
    fn name(&self) -> &str {
        "LFU"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::LeastFrequentlyUsed
    }
}

/// Lookup table from policy name to implementation.
///
/// Names are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn ExpirationPolicy>>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// A registry holding the built-in `LRU` and `LFU` policies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Lru));
        registry.register(Arc::new(Lfu));
        registry
    }

    /// Register a policy under its name, replacing any previous one.
    pub fn register(&mut self, policy: Arc<dyn ExpirationPolicy>) {
        let name = policy.name().to_ascii_uppercase();
        tracing::debug!("Registered expiration policy '{}'", name);
        self.policies.insert(name, policy);
    }

    /// Look up a policy.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExpirationPolicy>> {
        self.policies.get(&name.to_ascii_uppercase()).cloned()
    }

    /// Look up a policy, failing with a configuration error if unknown.
    pub fn resolve(&self, name: &str) -> AppResult<Arc<dyn ExpirationPolicy>> {
        self.get(name).ok_or_else(|| {
            AppError::configuration(format!(
                "Unknown expiration policy '{name}'. Known: {}",
                self.names().join(", ")
            ))
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
