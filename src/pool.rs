//! Syncer pool - the directory of live, scheduled syncers
//!
//! A hostname is in the pool exactly when a job tagged `<hostname>-job` is scheduled. The
//! map and the scheduler sit behind one lock so pause, resume and period changes update both
//! together; readers never see one without the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::{check_unique_hostnames, RegistryCatalog};
use crate::client::DockerCli;
use crate::config::RegistryConfig;
use crate::display::TransferDisplay;
use crate::error::{Result, SyncError};
use crate::scheduler::{parse_schedule, JobHandle, Scheduler};
use crate::syncer::{Details, Syncer};

/// Builds a fresh syncer for a registry
pub trait SyncerFactory: Send + Sync {
    fn build(&self, registry: &RegistryConfig, cancel: CancellationToken) -> Result<Syncer>;
}

/// Production factory: docker CLI client, script discovery, tag-list oracle
pub struct DockerSyncerFactory {
    display: Arc<dyn TransferDisplay>,
    http: reqwest::Client,
}

impl DockerSyncerFactory {
    pub fn new(display: Arc<dyn TransferDisplay>) -> Self {
        Self {
            display,
            http: reqwest::Client::new(),
        }
    }
}

impl SyncerFactory for DockerSyncerFactory {
    fn build(&self, registry: &RegistryConfig, cancel: CancellationToken) -> Result<Syncer> {
        let client = DockerCli::new()?;
        Ok(Syncer::for_registry(
            registry,
            self.http.clone(),
            Arc::new(client),
            self.display.clone(),
            cancel,
        ))
    }
}

/// Snapshot of a live syncer as served by the control plane
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncerSummary {
    pub hostname: String,
    pub repository: String,
    pub job_tag: String,
    pub remove_local_images: bool,
    pub provider: String,
    pub schedule: String,
    pub details: Details,
    pub next_run: Option<DateTime<Utc>>,
    pub scheduled_runs: u64,
}

struct ActiveSyncer {
    syncer: Arc<Syncer>,
    job: JobHandle,
}

impl ActiveSyncer {
    fn summary(&self) -> SyncerSummary {
        let settings = self.syncer.settings();
        SyncerSummary {
            hostname: settings.hostname.clone(),
            repository: settings.repository.clone(),
            job_tag: self.syncer.job_tag().to_string(),
            remove_local_images: settings.remove_local_images,
            provider: settings.registry_provider.clone(),
            schedule: self.job.expression().to_string(),
            details: self.syncer.details(),
            next_run: self.job.next_run(),
            scheduled_runs: self.job.run_count(),
        }
    }
}

struct PoolState {
    syncers: HashMap<String, ActiveSyncer>,
    scheduler: Scheduler,
}

impl PoolState {
    /// Cancel the syncer, unschedule its job and drop it from the map
    fn stop(&mut self, hostname: &str) -> Option<Arc<Syncer>> {
        let active = self.syncers.remove(hostname)?;
        active.syncer.cancel();
        if let Err(e) = self.scheduler.remove_by_tag(active.syncer.job_tag()) {
            warn!("Syncer for {} had no scheduled job: {}", hostname, e);
        }
        Some(active.syncer)
    }
}

pub struct SyncerPool {
    catalog: RegistryCatalog,
    factory: Arc<dyn SyncerFactory>,
    state: RwLock<PoolState>,
    shutdown: CancellationToken,
}

impl SyncerPool {
    pub fn new(
        catalog: RegistryCatalog,
        factory: Arc<dyn SyncerFactory>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            factory,
            state: RwLock::new(PoolState {
                syncers: HashMap::new(),
                scheduler: Scheduler::new(shutdown.clone()),
            }),
            shutdown,
        }
    }

    pub fn catalog(&self) -> &RegistryCatalog {
        &self.catalog
    }

    /// Schedule every configured registry.
    ///
    /// Duplicate hostnames fail before any job starts. A registry whose setup fails is logged
    /// and left out; the rest still start. Returns how many syncers are running.
    pub async fn start(&self) -> Result<usize> {
        check_unique_hostnames(self.catalog.registries())?;

        let mut state = self.state.write().await;
        for registry in self.catalog.iter() {
            match self.setup_registry_job(&mut state.scheduler, registry, &registry.sync_period) {
                Ok((syncer, job)) => {
                    state
                        .syncers
                        .insert(registry.hostname.clone(), ActiveSyncer { syncer, job });
                }
                Err(e) => error!("Could not set up syncer for {}: {}", registry.hostname, e),
            }
        }

        info!("Started {} of {} syncers", state.syncers.len(), self.catalog.len());
        Ok(state.syncers.len())
    }

    /// Build a syncer and bind it to `period` on `scheduler` under its job tag
    pub fn setup_registry_job(
        &self,
        scheduler: &mut Scheduler,
        registry: &RegistryConfig,
        period: &str,
    ) -> Result<(Arc<Syncer>, JobHandle)> {
        parse_schedule(period)?;
        let syncer = self.build_syncer(registry)?;
        let job = scheduler.cron(period, syncer.job_tag(), syncer.clone())?;
        Ok((syncer, job))
    }

    fn build_syncer(&self, registry: &RegistryConfig) -> Result<Arc<Syncer>> {
        let syncer = self.factory.build(registry, self.shutdown.child_token())?;
        Ok(Arc::new(syncer))
    }

    /// Swap in a freshly built syncer on `period`.
    ///
    /// The replacement is built before the current syncer is touched, so a failed build leaves
    /// the running one scheduled.
    fn replace(
        &self,
        state: &mut PoolState,
        registry: &RegistryConfig,
        period: &str,
    ) -> Result<(JobHandle, bool)> {
        parse_schedule(period)?;
        let syncer = self.build_syncer(registry)?;

        let replaced = state.stop(&registry.hostname).is_some();
        let job = state.scheduler.cron(period, syncer.job_tag(), syncer.clone())?;
        state.syncers.insert(
            registry.hostname.clone(),
            ActiveSyncer {
                syncer,
                job: job.clone(),
            },
        );
        Ok((job, replaced))
    }

    /// Stop a registry's syncer and its job. An in-flight run stops at the next image.
    pub async fn pause(&self, hostname: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .stop(hostname)
            .ok_or_else(|| not_active(hostname))?;
        info!("Paused syncer for {}", hostname);
        Ok(())
    }

    /// Rebuild a registry's syncer from configuration and schedule it again.
    ///
    /// A syncer that is still active is replaced, so at most one ever runs per host.
    pub async fn resume(&self, hostname: &str) -> Result<JobHandle> {
        let registry = self.catalog.get(hostname)?;

        let mut state = self.state.write().await;
        let (job, replaced) = self.replace(&mut state, registry, &registry.sync_period)?;
        if replaced {
            info!("Syncer for {} was already active, restarted it", hostname);
        }
        info!("Resumed syncer for {}", hostname);
        Ok(job)
    }

    /// Reschedule an active registry on a new cron expression until it is next resumed
    pub async fn change_period(&self, hostname: &str, period: &str) -> Result<JobHandle> {
        parse_schedule(period)?;
        let registry = self.catalog.get(hostname)?;

        let mut state = self.state.write().await;
        if !state.syncers.contains_key(hostname) {
            return Err(not_active(hostname));
        }

        let (job, _) = self.replace(&mut state, registry, period)?;
        info!("Changed sync period for {} to '{}'", hostname, period);
        Ok(job)
    }

    pub async fn details(&self, hostname: &str) -> Result<SyncerSummary> {
        let state = self.state.read().await;
        state
            .syncers
            .get(hostname)
            .map(ActiveSyncer::summary)
            .ok_or_else(|| not_active(hostname))
    }

    /// Live syncers, sorted by hostname
    pub async fn list_active(&self) -> Vec<SyncerSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<SyncerSummary> =
            state.syncers.values().map(ActiveSyncer::summary).collect();
        summaries.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        summaries
    }

    pub fn list_configured(&self) -> &[RegistryConfig] {
        self.catalog.registries()
    }

    pub async fn syncer(&self, hostname: &str) -> Option<Arc<Syncer>> {
        let state = self.state.read().await;
        state.syncers.get(hostname).map(|active| active.syncer.clone())
    }

    pub async fn is_active(&self, hostname: &str) -> bool {
        self.state.read().await.syncers.contains_key(hostname)
    }

    pub async fn active_hostnames(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut hostnames: Vec<String> = state.syncers.keys().cloned().collect();
        hostnames.sort();
        hostnames
    }

    pub async fn scheduled_tags(&self) -> Vec<String> {
        self.state.read().await.scheduler.tags()
    }

    /// Cancel every syncer and stop the scheduler
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        for active in state.syncers.values() {
            active.syncer.cancel();
        }
        state.syncers.clear();
        self.shutdown.cancel();
        state.scheduler.shutdown().await;
        info!("Syncer pool shut down");
    }
}

fn not_active(hostname: &str) -> SyncError {
    SyncError::SyncerNotFound(hostname.to_string())
}
