//! Syncer - one registry's discover, filter, pull, retag, push cycle
//!
//! A run never fails as a whole because of a single image. Only a discovery failure aborts
//! the run; everything per image is logged and the loop moves on. Pausing cancels the
//! syncer's token, which is observed between images.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::RegistryClient;
use crate::config::RegistryConfig;
use crate::discovery::{Discovery, ScriptDiscovery};
use crate::display::{TransferDisplay, TransferOp};
use crate::error::{Result, SyncError};
use crate::image::{cron_job_tag, retag, Credentials};
use crate::oracle::{ExistenceOracle, TagListOracle};
use crate::scheduler::Job;

/// Registry fields a syncer needs at run time, copied out of the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerSettings {
    pub hostname: String,
    pub repository: String,
    pub pull_auth: String,
    pub push_auth: String,
    pub remove_local_images: bool,
    pub registry_provider: String,
    pub sync_period: String,
}

impl From<&RegistryConfig> for SyncerSettings {
    fn from(registry: &RegistryConfig) -> Self {
        Self {
            hostname: registry.hostname.clone(),
            repository: registry.repository.clone(),
            pull_auth: registry.pull_auth_config.clone(),
            push_auth: registry.push_auth_config.clone(),
            remove_local_images: registry.delete_local_images,
            registry_provider: registry.registry_provider.clone(),
            sync_period: registry.sync_period.clone(),
        }
    }
}

/// Outcome of a single `process` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub discovered: usize,
    pub pushed: usize,
    pub already_present: usize,
    pub failed: usize,
    pub removed: usize,
    /// The run stopped early because the syncer was paused
    pub cancelled: bool,
    pub duration: Duration,
}

/// Lifetime facts about a syncer instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub created: DateTime<Utc>,
    pub number_of_syncs: u64,
}

enum ImageOutcome {
    AlreadyPresent,
    Pushed { removed: bool },
}

/// Handles image synchronization for one destination registry
pub struct Syncer {
    settings: SyncerSettings,
    job_tag: String,
    created: DateTime<Utc>,
    runs: AtomicU64,
    discovery: Box<dyn Discovery>,
    oracle: Box<dyn ExistenceOracle>,
    client: Arc<dyn RegistryClient>,
    display: Arc<dyn TransferDisplay>,
    cancel: CancellationToken,
}

impl Syncer {
    pub fn new(
        settings: SyncerSettings,
        discovery: Box<dyn Discovery>,
        oracle: Box<dyn ExistenceOracle>,
        client: Arc<dyn RegistryClient>,
        display: Arc<dyn TransferDisplay>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_tag: cron_job_tag(&settings.hostname),
            settings,
            created: Utc::now(),
            runs: AtomicU64::new(0),
            discovery,
            oracle,
            client,
            display,
            cancel,
        }
    }

    /// Syncer wired to the registry's discovery script and tag-list endpoint
    pub fn for_registry(
        registry: &RegistryConfig,
        http: reqwest::Client,
        client: Arc<dyn RegistryClient>,
        display: Arc<dyn TransferDisplay>,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            SyncerSettings::from(registry),
            Box::new(ScriptDiscovery::from_registry(registry)),
            Box::new(TagListOracle::new(http, registry)),
            client,
            display,
            cancel,
        )
    }

    pub fn settings(&self) -> &SyncerSettings {
        &self.settings
    }

    pub fn hostname(&self) -> &str {
        &self.settings.hostname
    }

    pub fn job_tag(&self) -> &str {
        &self.job_tag
    }

    pub fn details(&self) -> Details {
        Details {
            created: self.created,
            number_of_syncs: self.runs.load(Ordering::Relaxed),
        }
    }

    /// Signal any in-flight run to stop at the next image boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one synchronization cycle
    pub async fn process(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let hostname = self.hostname();
        self.runs.fetch_add(1, Ordering::Relaxed);

        let images = self.discovery.discover().await.map_err(|e| {
            error!(
                "error encountered when executing {}. Exiting image syncing process for {}: {}",
                self.discovery.describe(),
                hostname,
                e
            );
            e
        })?;

        info!("Beginning synchronization for {}", hostname);
        let mut report = SyncReport {
            discovered: images.len(),
            ..Default::default()
        };

        for image in images.iter().filter(|image| !image.is_empty()) {
            if self.cancel.is_cancelled() {
                info!(
                    "Canceling image synchronization for {} due to syncer pause",
                    hostname
                );
                report.cancelled = true;
                break;
            }

            match self.sync_image(image).await {
                Ok(ImageOutcome::AlreadyPresent) => report.already_present += 1,
                Ok(ImageOutcome::Pushed { removed }) => {
                    report.pushed += 1;
                    if removed {
                        report.removed += 1;
                    }
                }
                Err(SyncError::Cancelled) => {
                    info!(
                        "Canceling image synchronization for {} while processing {}",
                        hostname, image
                    );
                    report.cancelled = true;
                    break;
                }
                Err(_) => report.failed += 1,
            }
        }

        report.duration = started.elapsed();
        info!(
            "Done synchronizing images for {} in {:.2}s: {} pushed, {} already present, {} failed",
            hostname,
            report.duration.as_secs_f64(),
            report.pushed,
            report.already_present,
            report.failed
        );
        Ok(report)
    }

    async fn sync_image(&self, image: &str) -> Result<ImageOutcome> {
        let hostname = self.hostname();

        let already_pushed = self.oracle.image_exists(image).await.map_err(|e| {
            log_step_failure(
                e,
                format!("Error encountered while checking if {image} has already been pushed to {hostname}"),
            )
        })?;
        if already_pushed {
            info!("{} has already been retagged and pushed to {}", image, hostname);
            return Ok(ImageOutcome::AlreadyPresent);
        }

        let pull_auth = Credentials::parse(&self.settings.pull_auth, hostname)
            .map_err(|e| log_step_failure(e, format!("Cannot pull {image}")))?;
        self.client
            .pull(image, pull_auth.as_ref(), self.display.as_ref(), &self.cancel)
            .await
            .map_err(|e| log_step_failure(e, format!("Error encountered while pulling {image}")))?;

        let retagged = retag(image, hostname, &self.settings.repository);
        let mut progress = self
            .display
            .begin(TransferOp::Retag, &format!("{image} -> {retagged}"));
        let tagged = self.client.tag(image, &retagged, &self.cancel).await;
        progress.finish();
        tagged.map_err(|e| {
            log_step_failure(e, format!("Could not retag image '{image}' -> '{retagged}'"))
        })?;

        let push_auth = Credentials::parse(&self.settings.push_auth, hostname)
            .map_err(|e| log_step_failure(e, format!("Cannot push {retagged}")))?;
        self.client
            .push(
                &retagged,
                hostname,
                push_auth.as_ref(),
                self.display.as_ref(),
                &self.cancel,
            )
            .await
            .map_err(|e| {
                log_step_failure(
                    e,
                    format!("Error encountered while pushing {retagged} to {hostname}"),
                )
            })?;

        let removed = self.settings.remove_local_images && self.remove_local(image, &retagged).await;
        Ok(ImageOutcome::Pushed { removed })
    }

    /// The retagged reference shares the original's image id, one removal drops both
    async fn remove_local(&self, image: &str, retagged: &str) -> bool {
        let mut progress = self.display.begin(
            TransferOp::Remove,
            &format!("locally held images {image}, {retagged}"),
        );
        let result = self.client.remove(image, &self.cancel).await;
        progress.finish();

        match result {
            Ok(()) => true,
            Err(e) if e.is_cancelled() => false,
            Err(e) => {
                error!("couldn't delete locally held image {}: {}", image, e);
                false
            }
        }
    }
}

fn log_step_failure(err: SyncError, context: String) -> SyncError {
    if err.is_cancelled() {
        debug!("{}: cancelled", context);
    } else {
        error!("{}: {}", context, err);
    }
    err
}

#[async_trait]
impl Job for Syncer {
    async fn run(&self) {
        // failures are logged inside process, a scheduled run has nobody to report to
        if let Ok(report) = self.process().await {
            debug!("Scheduled run for {} finished: {:?}", self.hostname(), report);
        }
    }
}
