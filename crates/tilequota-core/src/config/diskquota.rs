//! Disk quota configuration and its administrative change set.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::quota::{Quota, StorageUnit};

/// Unit of the cleanup frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl TimeUnit {
    /// Duration of `amount` of this unit.
    pub fn to_duration(self, amount: u64) -> Duration {
        let seconds = match self {
            Self::Seconds => amount,
            Self::Minutes => amount.saturating_mul(60),
            Self::Hours => amount.saturating_mul(3_600),
            Self::Days => amount.saturating_mul(86_400),
        };
        Duration::from_secs(seconds)
    }
}

/// An explicit quota for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LayerQuota {
    /// Layer name.
    #[validate(length(min = 1, message = "layer quota needs a layer name"))]
    pub layer: String,
    /// Expiration policy for this layer; falls back to the global policy.
    #[serde(default)]
    pub expiration_policy_name: Option<String>,
    /// Byte limit. A layer listed without a limit is governed by the global quota.
    #[serde(default)]
    pub quota: Option<Quota>,
}

impl LayerQuota {
    /// Create a layer quota with an explicit limit and policy.
    pub fn new(layer: impl Into<String>, policy: impl Into<String>, quota: Quota) -> Self {
        Self {
            layer: layer.into(),
            expiration_policy_name: Some(policy.into()),
            quota: Some(quota),
        }
    }
}

/// Disk quota settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DiskQuotaConfig {
    /// Whether quota enforcement runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// How often usage is compared against the limits.
    #[serde(default = "default_cleanup_frequency")]
    #[validate(range(min = 1, message = "cache cleanup frequency must be greater than zero"))]
    pub cache_cleanup_frequency: u64,
    /// Unit of `cache_cleanup_frequency`.
    #[serde(default = "default_cleanup_units")]
    pub cache_cleanup_units: TimeUnit,
    /// Upper bound on concurrently running eviction cycles.
    #[serde(default = "default_max_concurrent_cleanups")]
    #[validate(range(min = 1, message = "max concurrent cleanups must be greater than zero"))]
    pub max_concurrent_cleanups: usize,
    /// Policy used for globally managed layers.
    #[serde(default = "default_global_policy")]
    pub global_expiration_policy_name: Option<String>,
    /// Limit shared by every layer without its own quota.
    #[serde(default = "default_global_quota")]
    pub global_quota: Option<Quota>,
    /// Tile sizes are rounded up to a multiple of this many bytes.
    #[serde(default = "default_disk_block_size")]
    #[validate(range(min = 1, message = "disk block size must be greater than zero"))]
    pub disk_block_size: u64,
    /// Upper bound on one truncation call during eviction.
    #[serde(default = "default_truncate_timeout")]
    #[validate(range(min = 1, message = "truncate timeout must be greater than zero"))]
    pub truncate_timeout_seconds: u64,
    /// Per-layer limits.
    #[serde(default)]
    #[validate(nested)]
    pub layer_quotas: Vec<LayerQuota>,
}

impl Default for DiskQuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_cleanup_frequency: default_cleanup_frequency(),
            cache_cleanup_units: default_cleanup_units(),
            max_concurrent_cleanups: default_max_concurrent_cleanups(),
            global_expiration_policy_name: default_global_policy(),
            global_quota: default_global_quota(),
            disk_block_size: default_disk_block_size(),
            truncate_timeout_seconds: default_truncate_timeout(),
            layer_quotas: Vec::new(),
        }
    }
}

impl DiskQuotaConfig {
    /// Validate field ranges and policy names.
    ///
    /// `known_policies` are the registered policy names; matching is
    /// case-insensitive.
    pub fn check(&self, known_policies: &[&str]) -> AppResult<()> {
        self.validate()?;

        let known = |name: &str| known_policies.iter().any(|p| p.eq_ignore_ascii_case(name));

        if let Some(name) = &self.global_expiration_policy_name {
            if !known(name) {
                return Err(AppError::configuration(format!(
                    "Unknown global expiration policy '{name}'. Known: {}",
                    known_policies.join(", ")
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for lq in &self.layer_quotas {
            if !seen.insert(lq.layer.as_str()) {
                return Err(AppError::configuration(format!(
                    "Layer '{}' has more than one quota entry",
                    lq.layer
                )));
            }
            if let Some(name) = &lq.expiration_policy_name {
                if !known(name) {
                    return Err(AppError::configuration(format!(
                        "Unknown expiration policy '{name}' for layer '{}'",
                        lq.layer
                    )));
                }
            }
            if lq.quota.is_some()
                && lq.expiration_policy_name.is_none()
                && self.global_expiration_policy_name.is_none()
            {
                return Err(AppError::configuration(format!(
                    "Layer '{}' has a quota but no expiration policy and no global policy is set",
                    lq.layer
                )));
            }
        }
        Ok(())
    }

    /// Interval between usage checks.
    pub fn cleanup_interval(&self) -> Duration {
        self.cache_cleanup_units
            .to_duration(self.cache_cleanup_frequency)
    }

    /// Explicit quota entry for a layer.
    pub fn layer_quota(&self, layer: &str) -> Option<&LayerQuota> {
        self.layer_quotas.iter().find(|lq| lq.layer == layer)
    }

    /// Names of layers that have an explicit quota entry.
    pub fn layer_names(&self) -> BTreeSet<String> {
        self.layer_quotas.iter().map(|lq| lq.layer.clone()).collect()
    }

    /// Effective policy name for a layer.
    pub fn policy_for_layer(&self, layer: &str) -> Option<String> {
        self.layer_quota(layer)
            .and_then(|lq| lq.expiration_policy_name.clone())
            .or_else(|| self.global_expiration_policy_name.clone())
    }
}

/// An administrative update to [`DiskQuotaConfig`].
///
/// Every field is optional; absent fields keep their current value. The
/// change is validated as a whole against the resulting configuration and
/// is either applied entirely or not at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigChange {
    /// Enable or disable enforcement.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// New cleanup frequency.
    #[serde(default)]
    pub cache_cleanup_frequency: Option<u64>,
    /// New cleanup frequency unit.
    #[serde(default)]
    pub cache_cleanup_units: Option<TimeUnit>,
    /// New concurrency cap.
    #[serde(default)]
    pub max_concurrent_cleanups: Option<usize>,
    /// New global policy name.
    #[serde(default)]
    pub global_expiration_policy_name: Option<String>,
    /// New global limit.
    #[serde(default)]
    pub global_quota: Option<Quota>,
    /// Remove the global limit.
    #[serde(default)]
    pub clear_global_quota: bool,
    /// Layer quotas to add or replace.
    #[serde(default)]
    pub layer_quotas: Vec<LayerQuota>,
    /// Layers whose explicit quota is removed.
    #[serde(default)]
    pub removed_layer_quotas: Vec<String>,
}

impl ConfigChange {
    /// Produce the configuration that results from applying this change.
    pub fn apply_to(
        &self,
        current: &DiskQuotaConfig,
        known_policies: &[&str],
    ) -> AppResult<DiskQuotaConfig> {
        let mut next = current.clone();

        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(frequency) = self.cache_cleanup_frequency {
            next.cache_cleanup_frequency = frequency;
        }
        if let Some(units) = self.cache_cleanup_units {
            next.cache_cleanup_units = units;
        }
        if let Some(max) = self.max_concurrent_cleanups {
            next.max_concurrent_cleanups = max;
        }
        if let Some(name) = &self.global_expiration_policy_name {
            next.global_expiration_policy_name = Some(name.clone());
        }
        if self.clear_global_quota {
            next.global_quota = None;
        } else if let Some(quota) = self.global_quota {
            next.global_quota = Some(quota);
        }

        next.layer_quotas
            .retain(|lq| !self.removed_layer_quotas.contains(&lq.layer));
        for update in &self.layer_quotas {
            match next.layer_quotas.iter_mut().find(|lq| lq.layer == update.layer) {
                Some(existing) => *existing = update.clone(),
                None => next.layer_quotas.push(update.clone()),
            }
        }

        next.check(known_policies)?;
        Ok(next)
    }
}

fn default_cleanup_frequency() -> u64 {
    10
}

fn default_cleanup_units() -> TimeUnit {
    TimeUnit::Seconds
}

fn default_max_concurrent_cleanups() -> usize {
    2
}

fn default_global_policy() -> Option<String> {
    Some("LFU".to_string())
}

fn default_global_quota() -> Option<Quota> {
    Some(Quota::from_unit(500, StorageUnit::MiB))
}

fn default_disk_block_size() -> u64 {
    4096
}

fn default_truncate_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const POLICIES: &[&str] = &["LRU", "LFU"];

    #[test]
    fn test_defaults() {
        let config = DiskQuotaConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(10));
        assert_eq!(config.max_concurrent_cleanups, 2);
        assert_eq!(config.global_quota, Some(Quota::from_unit(500, StorageUnit::MiB)));
        assert!(config.check(POLICIES).is_ok());
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let change = ConfigChange {
            cache_cleanup_frequency: Some(0),
            ..Default::default()
        };
        let err = change
            .apply_to(&DiskQuotaConfig::default(), POLICIES)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("frequency"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let change = ConfigChange {
            max_concurrent_cleanups: Some(0),
            ..Default::default()
        };
        assert!(change.apply_to(&DiskQuotaConfig::default(), POLICIES).is_err());
    }

    #[test]
    fn test_unknown_policy_rejected_without_partial_apply() {
        let current = DiskQuotaConfig::default();
        let change = ConfigChange {
            enabled: Some(true),
            global_expiration_policy_name: Some("MRU".to_string()),
            ..Default::default()
        };
        let err = change.apply_to(&current, POLICIES).unwrap_err();
        assert!(err.message.contains("MRU"));
        assert!(!current.enabled);
    }

    #[test]
    fn test_layer_quota_upsert_and_removal() {
        let current = DiskQuotaConfig {
            layer_quotas: vec![LayerQuota::new("roads", "LRU", Quota::from_bytes(10))],
            ..Default::default()
        };
        let change = ConfigChange {
            layer_quotas: vec![
                LayerQuota::new("roads", "lfu", Quota::from_bytes(20)),
                LayerQuota::new("rivers", "LRU", Quota::from_bytes(30)),
            ],
            ..Default::default()
        };
        let next = change.apply_to(&current, POLICIES).unwrap();
        assert_eq!(next.layer_quotas.len(), 2);
        assert_eq!(next.layer_quota("roads").unwrap().quota, Some(Quota::from_bytes(20)));

        let removal = ConfigChange {
            removed_layer_quotas: vec!["roads".to_string()],
            ..Default::default()
        };
        let next = removal.apply_to(&next, POLICIES).unwrap();
        assert_eq!(next.layer_names(), BTreeSet::from(["rivers".to_string()]));
    }

    #[test]
    fn test_duplicate_layer_entries_rejected() {
        let config = DiskQuotaConfig {
            layer_quotas: vec![
                LayerQuota::new("roads", "LRU", Quota::from_bytes(10)),
                LayerQuota::new("roads", "LFU", Quota::from_bytes(10)),
            ],
            ..Default::default()
        };
        assert!(config.check(POLICIES).is_err());
    }

    #[test]
    fn test_layer_policy_falls_back_to_global() {
        let config = DiskQuotaConfig {
            layer_quotas: vec![LayerQuota {
                layer: "roads".into(),
                expiration_policy_name: None,
                quota: Some(Quota::from_bytes(1)),
            }],
            ..Default::default()
        };
        assert_eq!(config.policy_for_layer("roads").as_deref(), Some("LFU"));
    }

    #[test]
    fn test_time_units() {
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Days.to_duration(1), Duration::from_secs(86_400));
    }
}
