//! The disk quota monitor.
//!
//! Owns the live [`DiskQuotaConfig`], compares usage against the configured
//! limits on a schedule and launches eviction cycles for every quota that is
//! exceeded. At most one cycle runs per layer (or for the global quota) at a
//! time, and at most `max_concurrent_cleanups` cycles evict concurrently.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tilequota_core::config::{self, ConfigChange, DiskQuotaConfig};
use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::traits::TileTruncator;
use tilequota_core::types::Quota;
use tilequota_entity::policy::PolicyRegistry;
use tilequota_store::{QuotaStore, TilePageCalculator};

use crate::cleaner::CacheCleaner;
use crate::error::EvictionError;
use crate::permits::CleanupPermits;
use crate::resolver::{
    CycleTarget, GlobalQuotaResolver, LayerQuotaResolver, QuotaResolver, globally_governed_layers,
};
use crate::scheduler::CleanupScheduler;

/// Lifecycle of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not started, or shut down.
    Stopped,
    /// Started, no cycle running.
    Idle,
    /// Comparing usage against the limits.
    Checking,
    /// At least one eviction cycle is running.
    Evicting,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Evicting => "evicting",
        };
        f.write_str(s)
    }
}

struct MonitorInner {
    store: Arc<dyn QuotaStore>,
    calculator: TilePageCalculator,
    cleaner: CacheCleaner,
    policies: PolicyRegistry,
    config: Arc<RwLock<DiskQuotaConfig>>,
    permits: CleanupPermits,
    running: DashMap<CycleTarget, CancellationToken>,
    cycles: Mutex<Vec<JoinHandle<()>>>,
    state: watch::Sender<MonitorState>,
    shutdown: CancellationToken,
    disabled_by_env: bool,
}

/// Enforces disk quotas by evicting pages.
pub struct DiskQuotaMonitor {
    inner: Arc<MonitorInner>,
    scheduler: Mutex<Option<CleanupScheduler>>,
}

impl fmt::Debug for DiskQuotaMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskQuotaMonitor")
            .field("state", &*self.inner.state.borrow())
            .field("running_cycles", &self.inner.running.len())
            .field("disabled_by_env", &self.inner.disabled_by_env)
            .finish()
    }
}

impl DiskQuotaMonitor {
    /// Create a monitor. The configuration is validated against the
    /// registered policies.
    pub fn new(
        store: Arc<dyn QuotaStore>,
        calculator: TilePageCalculator,
        truncator: Arc<dyn TileTruncator>,
        policies: PolicyRegistry,
        quota_config: DiskQuotaConfig,
    ) -> AppResult<Self> {
        let names = policies.names();
        let known: Vec<&str> = names.iter().map(String::as_str).collect();
        quota_config.check(&known)?;

        let disabled_by_env = config::disabled_by_env();
        if disabled_by_env {
            warn!(
                variable = config::DISKQUOTA_DISABLED_ENV,
                "Disk quota disabled through the environment"
            );
        }

        let (state, _) = watch::channel(MonitorState::Stopped);
        let inner = MonitorInner {
            cleaner: CacheCleaner::new(store.clone(), truncator, policies.clone()),
            store,
            calculator,
            policies,
            permits: CleanupPermits::new(quota_config.max_concurrent_cleanups),
            config: Arc::new(RwLock::new(quota_config)),
            running: DashMap::new(),
            cycles: Mutex::new(Vec::new()),
            state,
            shutdown: CancellationToken::new(),
            disabled_by_env,
        };
        Ok(Self {
            inner: Arc::new(inner),
            scheduler: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MonitorState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.inner.state.subscribe()
    }

    /// Whether enforcement is on in configuration and not disabled through
    /// the environment.
    pub async fn is_enabled(&self) -> bool {
        !self.inner.disabled_by_env && self.inner.config.read().await.enabled
    }

    /// Whether the cleanup task is running.
    pub async fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_cancelled())
    }

    /// Reconcile the store with the layer catalog and start the periodic
    /// cleanup task.
    ///
    /// When disabled through the environment nothing is started.
    pub async fn start_up(&self) -> AppResult<()> {
        if self.inner.disabled_by_env {
            info!("Disk quota monitor not started: disabled through the environment");
            return Ok(());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::service_unavailable(
                "Disk quota monitor has been shut down",
            ));
        }

        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            debug!("Disk quota monitor already started");
            return Ok(());
        }

        self.inner.store.start_up().await?;

        let interval_inner = self.inner.clone();
        let tick_inner = self.inner.clone();
        *scheduler = Some(CleanupScheduler::spawn(
            move || {
                let inner = interval_inner.clone();
                async move { inner.config.read().await.cleanup_interval() }
            },
            move || {
                let inner = tick_inner.clone();
                async move {
                    if let Err(e) = inner.check_once().await {
                        error!(error = %e, "Quota check failed");
                    }
                }
            },
        ));
        self.inner.state.send_replace(MonitorState::Idle);

        let config = self.inner.config.read().await;
        info!(
            enabled = config.enabled,
            interval_secs = config.cleanup_interval().as_secs(),
            max_concurrent = config.max_concurrent_cleanups,
            "Disk quota monitor started"
        );
        Ok(())
    }

    /// Stop the cleanup task, cancel running cycles and wait up to
    /// `timeout` for them to exit.
    pub async fn shut_down(&self, timeout: Duration) {
        info!("Shutting down disk quota monitor");
        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        self.inner.shutdown.cancel();
        if tokio::time::timeout(timeout, self.wait_for_cycles())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = timeout.as_secs(),
                running = self.inner.running.len(),
                "Eviction cycles did not stop in time"
            );
        }
        self.inner.state.send_replace(MonitorState::Stopped);
        info!("Disk quota monitor stopped");
    }

    /// Compare usage against every limit once and launch cycles for the
    /// exceeded ones. Returns the targets of newly launched cycles.
    pub async fn check_once(&self) -> AppResult<Vec<CycleTarget>> {
        self.inner.check_once().await
    }

    /// Wait until every launched cycle has finished.
    pub async fn wait_for_cycles(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = self.inner.cycles.lock().await.drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Eviction cycle task failed");
                }
            }
        }
    }

    /// Targets with a cycle in flight.
    pub fn running_cycles(&self) -> BTreeSet<CycleTarget> {
        self.inner.running.iter().map(|e| e.key().clone()).collect()
    }

    /// Abandon the in-flight cycle of a layer. Pages already evicted stay
    /// evicted. Returns `false` if no cycle was running for it.
    pub fn cancel_layer(&self, layer_name: &str) -> bool {
        self.cancel_target(&CycleTarget::Layer(layer_name.to_string()))
    }

    /// Abandon the in-flight cycle of a target.
    pub fn cancel_target(&self, target: &CycleTarget) -> bool {
        match self.inner.running.get(target) {
            Some(cancel) => {
                info!(target = %target, "Cancelling eviction cycle");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// A snapshot of the configuration.
    pub async fn get_config(&self) -> DiskQuotaConfig {
        self.inner.config.read().await.clone()
    }

    /// Apply an administrative change.
    ///
    /// The resulting configuration is validated as a whole; on error nothing
    /// changes. Running cycles pick up new limits and policies on their next
    /// page. A new concurrency cap counts cycles already running or queued.
    pub async fn apply_config_change(&self, change: ConfigChange) -> AppResult<DiskQuotaConfig> {
        let names = self.inner.policies.names();
        let known: Vec<&str> = names.iter().map(String::as_str).collect();

        let mut config = self.inner.config.write().await;
        let next = change.apply_to(&config, &known)?;

        if next.max_concurrent_cleanups != config.max_concurrent_cleanups {
            self.inner.permits.resize(next.max_concurrent_cleanups);
            debug!(
                max_concurrent = self.inner.permits.cap(),
                "Resized cleanup concurrency limit"
            );
        }
        *config = next.clone();
        info!(
            enabled = next.enabled,
            global_quota = ?next.global_quota.map(|q| q.to_string()),
            layer_quotas = next.layer_quotas.len(),
            "Disk quota configuration updated"
        );
        Ok(next)
    }

    /// Bytes used by a layer.
    pub async fn get_used_quota_by_layer_name(&self, layer_name: &str) -> AppResult<Quota> {
        self.inner.store.get_used_quota_by_layer_name(layer_name).await
    }

    /// Bytes used by every tile set.
    pub async fn get_globally_used_quota(&self) -> AppResult<Quota> {
        self.inner.store.get_globally_used_quota().await
    }

    /// Configured layer names.
    pub fn layer_names(&self) -> BTreeSet<String> {
        self.inner.calculator.layer_names()
    }

    /// The policy registry backing policy names.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.inner.policies
    }
}

impl MonitorInner {
    async fn check_once(self: &Arc<Self>) -> AppResult<Vec<CycleTarget>> {
        if self.disabled_by_env || self.shutdown.is_cancelled() {
            return Ok(Vec::new());
        }
        let config = self.config.read().await.clone();
        if !config.enabled {
            debug!("Disk quota disabled, skipping check");
            return Ok(Vec::new());
        }

        self.state.send_if_modified(|state| {
            if *state == MonitorState::Stopped {
                return false;
            }
            *state = MonitorState::Checking;
            true
        });
        let result = self.submit_exceeded(&config).await;
        self.refresh_state();
        result
    }

    async fn submit_exceeded(self: &Arc<Self>, config: &DiskQuotaConfig) -> AppResult<Vec<CycleTarget>> {
        let mut launched = Vec::new();

        for lq in &config.layer_quotas {
            let Some(limit) = lq.quota else {
                continue;
            };
            if config.policy_for_layer(&lq.layer).is_none() {
                continue;
            }
            let target = CycleTarget::Layer(lq.layer.clone());
            if self.running.contains_key(&target) {
                debug!(target = %target, "Previous cycle still running");
                continue;
            }
            let used = self.store.get_used_quota_by_layer_name(&lq.layer).await?;
            if used > limit {
                info!(layer = %lq.layer, used = %used, limit = %limit, "Layer quota exceeded");
                let resolver = LayerQuotaResolver::new(&lq.layer, self.config.clone(), self.store.clone());
                if self.launch(Box::new(resolver)).await {
                    launched.push(target);
                }
            }
        }

        if let (Some(limit), Some(_)) = (config.global_quota, &config.global_expiration_policy_name) {
            let used = self.store.get_globally_used_quota().await?;
            if used > limit && !self.running.contains_key(&CycleTarget::Global) {
                let layers = globally_governed_layers(config, self.store.as_ref()).await?;
                if layers.is_empty() {
                    warn!(used = %used, limit = %limit, "Global quota exceeded but no layer is governed by it");
                } else {
                    info!(used = %used, limit = %limit, layers = layers.len(), "Global quota exceeded");
                    let resolver = GlobalQuotaResolver::new(self.config.clone(), self.store.clone());
                    if self.launch(Box::new(resolver)).await {
                        launched.push(CycleTarget::Global);
                    }
                }
            }
        }

        Ok(launched)
    }

    /// Spawn a cycle unless one is already running for the same target.
    async fn launch(self: &Arc<Self>, resolver: Box<dyn QuotaResolver>) -> bool {
        let target = resolver.target().clone();
        let cancel = self.shutdown.child_token();
        match self.running.entry(target.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(entry) => {
                entry.insert(cancel.clone());
            }
        }
        self.refresh_state();

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            inner.run_cycle(resolver, cancel).await;
        });
        let mut cycles = self.cycles.lock().await;
        cycles.retain(|h| !h.is_finished());
        cycles.push(handle);
        true
    }

    async fn run_cycle(self: Arc<Self>, resolver: Box<dyn QuotaResolver>, cancel: CancellationToken) {
        let target = resolver.target().clone();
        let truncate_timeout = Duration::from_secs(self.config.read().await.truncate_timeout_seconds);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        };
        let result = match permit {
            Some(_permit) => {
                debug!(target = %target, "Eviction cycle started");
                self.cleaner
                    .expire(resolver.as_ref(), truncate_timeout, &cancel)
                    .await
            }
            None => Err(EvictionError::Cancelled),
        };

        match result {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => info!(target = %target, "Eviction cycle cancelled"),
            Err(e) => error!(target = %target, error = %e, "Eviction cycle failed"),
        }

        self.running.remove(&target);
        self.refresh_state();
    }

    fn refresh_state(&self) {
        let busy = !self.running.is_empty();
        self.state.send_if_modified(|state| {
            let next = match *state {
                MonitorState::Stopped => return false,
                _ if busy => MonitorState::Evicting,
                _ => MonitorState::Idle,
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
