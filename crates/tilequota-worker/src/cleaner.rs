//! One eviction cycle: expire pages until usage is back under the limit.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tilequota_core::traits::{TileTruncator, TruncateOutcome};
use tilequota_core::types::{Quota, QuotaDelta};
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::PolicyRegistry;
use tilequota_entity::stats::PageStatsPayload;
use tilequota_store::QuotaStore;

use crate::error::EvictionError;
use crate::resolver::QuotaResolver;

/// Totals of a finished eviction cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pages truncated.
    pub pages_evicted: u64,
    /// Tiles the truncator reported as deleted.
    pub tiles_deleted: u64,
    /// Bytes released.
    pub bytes_freed: Quota,
}

/// Evicts pages chosen by an expiration policy through the
/// [`TileTruncator`].
///
/// Counters are decremented only after the truncator has confirmed the
/// deletion, so a failed or interrupted cycle can overestimate usage but
/// never underestimate it.
#[derive(Debug, Clone)]
pub struct CacheCleaner {
    store: Arc<dyn QuotaStore>,
    truncator: Arc<dyn TileTruncator>,
    policies: PolicyRegistry,
}

impl CacheCleaner {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        truncator: Arc<dyn TileTruncator>,
        policies: PolicyRegistry,
    ) -> Self {
        Self {
            store,
            truncator,
            policies,
        }
    }

    /// Run a cycle for the quota behind `resolver`.
    ///
    /// Limit, usage and policy are re-read before every page, so the cycle
    /// follows configuration changes and concurrent deletions. Each
    /// truncation is bounded by `truncate_timeout`.
    pub async fn expire(
        &self,
        resolver: &dyn QuotaResolver,
        truncate_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, EvictionError> {
        let target = resolver.target();
        let mut report = CycleReport::default();

        loop {
            if cancel.is_cancelled() {
                return Err(EvictionError::Cancelled);
            }

            let Some(limit) = resolver.limit().await else {
                debug!(target = %target, "Quota removed, ending cycle");
                break;
            };
            let used = resolver.used().await?;
            if used <= limit {
                debug!(target = %target, used = %used, limit = %limit, "Usage within limit");
                break;
            }
            let Some(policy_name) = resolver.policy_name().await else {
                warn!(target = %target, "No expiration policy configured, ending cycle");
                break;
            };
            let policy = self.policies.resolve(&policy_name)?;
            let layers = resolver.layer_names().await?;

            let Some(candidate) = self
                .store
                .find_page_to_expire(policy.as_ref(), &layers)
                .await?
            else {
                warn!(
                    target = %target,
                    used = %used,
                    limit = %limit,
                    "No more pages to expire, usage stays above the limit"
                );
                break;
            };

            let page = candidate.page;
            let outcome = match self
                .truncate_page(&page, truncate_timeout, cancel)
                .await?
            {
                Some(outcome) => outcome,
                None => continue,
            };

            debug!(
                page = %page,
                tiles = outcome.tiles_deleted,
                bytes = outcome.bytes_freed,
                policy = %policy_name,
                "Page truncated"
            );
            report.pages_evicted += 1;
            report.tiles_deleted += outcome.tiles_deleted;
            report.bytes_freed = report.bytes_freed.add(Quota::from_bytes(u128::from(outcome.bytes_freed)));
        }

        info!(
            target = %target,
            pages = report.pages_evicted,
            tiles = report.tiles_deleted,
            freed = %report.bytes_freed,
            "Eviction cycle finished"
        );
        Ok(report)
    }

    /// Truncate one page and account for it. Returns `None` when the page
    /// could not be mapped back to tiles and was dropped from the statistics.
    async fn truncate_page(
        &self,
        page: &TilePage,
        truncate_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<TruncateOutcome>, EvictionError> {
        let tile_set = match self.store.get_tile_set_by_id(&page.tile_set_id).await {
            Ok(tile_set) => tile_set,
            Err(e) if e.is_not_found() => {
                warn!(page = %page, "Tile set of page no longer tracked, dropping page");
                self.store.set_truncated(page).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let range = match self.store.get_tiles_for_page(page).await {
            Ok(range) => range,
            Err(e) if e.is_not_found() => {
                warn!(page = %page, error = %e, "Page has no tile range, dropping page");
                self.store.set_truncated(page).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EvictionError::Cancelled),
            result = tokio::time::timeout(truncate_timeout, self.truncator.truncate(&range)) => result,
        };
        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(EvictionError::Truncation(format!("{page}: {e}"))),
            Err(_) => {
                return Err(EvictionError::Truncation(format!(
                    "{page}: timed out after {}s",
                    truncate_timeout.as_secs()
                )));
            }
        };

        let freed = Quota::from_bytes(u128::from(outcome.bytes_freed));
        let tiles = i64::try_from(outcome.tiles_deleted).unwrap_or(i64::MAX);
        self.store
            .add_to_quota_and_tile_counts(
                &tile_set,
                -QuotaDelta::from(freed),
                vec![PageStatsPayload::tiles(page.clone(), -tiles)],
            )
            .await?;
        self.store.set_truncated(page).await?;
        Ok(Some(outcome))
    }
}
