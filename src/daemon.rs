//! Daemon - wires configuration, the syncer pool and the control plane together
//!
//! `run` schedules every configured registry and serves the control plane until Ctrl+C or
//! [`Daemon::stop`]. `load` runs syncers once, immediately, without scheduling anything.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::catalog::RegistryCatalog;
use crate::config::Config;
use crate::error::SyncError;
use crate::pool::{DockerSyncerFactory, SyncerFactory, SyncerPool};
use crate::syncer::SyncReport;

/// Which registries a one-off load covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    Registry(String),
    All,
}

/// Result of loading one registry
#[derive(Debug)]
pub struct LoadOutcome {
    pub hostname: String,
    pub result: std::result::Result<SyncReport, SyncError>,
}

pub struct Daemon {
    config: Config,
    factory: Arc<dyn SyncerFactory>,
    pool: Arc<SyncerPool>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Daemon backed by the docker CLI. Duplicate registry hostnames are fatal here.
    pub fn new(config: Config) -> Result<Self> {
        let factory = Arc::new(DockerSyncerFactory::new(config.display.build()));
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: Config, factory: Arc<dyn SyncerFactory>) -> Result<Self> {
        let catalog = RegistryCatalog::new(config.registries.clone())
            .context("Invalid registry configuration")?;
        let shutdown = CancellationToken::new();
        let pool = Arc::new(SyncerPool::new(catalog, factory.clone(), shutdown.clone()));

        Ok(Self {
            config,
            factory,
            pool,
            shutdown,
        })
    }

    pub fn pool(&self) -> Arc<SyncerPool> {
        self.pool.clone()
    }

    /// Ask a running daemon or load to wind down
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Schedule every registry and block until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Starting picture-book sync daemon");

        let started = self
            .pool
            .start()
            .await
            .context("Failed to start registry syncers")?;
        if started == 0 {
            warn!("No registry syncers are running");
        }

        let api_task = if self.config.api.enabled {
            let pool = self.pool.clone();
            let api_config = self.config.api.clone();
            let shutdown = self.shutdown.clone();
            Some(tokio::spawn(async move {
                api::serve(pool, &api_config, shutdown).await
            }))
        } else {
            debug!("Control plane disabled");
            None
        };

        tokio::select! {
            _ = wait_for_shutdown_signal() => info!("Shutdown signal received, stopping daemon..."),
            _ = self.shutdown.cancelled() => info!("Daemon stop requested"),
        }

        self.pool.shutdown().await;

        if let Some(task) = api_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Control plane exited with error: {:#}", e),
                Err(e) => error!("Control plane task failed: {}", e),
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Run syncers once without scheduling. Ctrl+C stops between images.
    pub async fn load(&self, target: LoadTarget) -> Result<Vec<LoadOutcome>> {
        let registries = match &target {
            LoadTarget::Registry(hostname) => vec![self.pool.catalog().get(hostname)?.clone()],
            LoadTarget::All => self.pool.catalog().registries().to_vec(),
        };

        let shutdown = self.shutdown.clone();
        let signal = tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received, finishing current image...");
            shutdown.cancel();
        });

        let mut outcomes = Vec::with_capacity(registries.len());
        for registry in &registries {
            if self.shutdown.is_cancelled() {
                break;
            }
            info!("Loading images for {}", registry.hostname);
            let result = match self.factory.build(registry, self.shutdown.child_token()) {
                Ok(syncer) => syncer.process().await,
                Err(e) => {
                    error!("Could not set up syncer for {}: {}", registry.hostname, e);
                    Err(e)
                }
            };
            outcomes.push(LoadOutcome {
                hostname: registry.hostname.clone(),
                result,
            });
        }

        signal.abort();
        Ok(outcomes)
    }
}

async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("Ctrl+C received"),
        Err(e) => {
            // without a signal handler only stop() can end the daemon
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
