//! Common test utilities and helpers for picture-book tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use picture_book::client::RegistryClient;
use picture_book::config::RegistryConfig;
use picture_book::discovery::Discovery;
use picture_book::display::{PlainDisplay, TransferDisplay};
use picture_book::image::{is_mutable_tag, retag, split_image_tag, Credentials};
use picture_book::oracle::ExistenceOracle;
use picture_book::pool::SyncerFactory;
use picture_book::syncer::{Syncer, SyncerSettings};
use picture_book::{Result, SyncError};

/// Temporary directory holding config files for a test
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    pub fn create_minimal_config(&self) -> PathBuf {
        self.create_test_config(
            r#"
registries:
  - hostname: a.example.io
    syncPeriod: "0 0 * * *"
    syncerScript: /bin/true
  - hostname: b.example.io
    repository: mirror
    syncPeriod: "0 12 * * *"
    syncerScript: /bin/true
"#,
        )
    }

    pub fn create_duplicate_config(&self) -> PathBuf {
        self.create_test_config(
            r#"
registries:
  - hostname: a.example.io
    syncPeriod: "0 0 * * *"
    syncerScript: /bin/true
  - hostname: a.example.io
    syncPeriod: "0 12 * * *"
    syncerScript: /bin/true
"#,
        )
    }
}

pub fn registry(hostname: &str, period: &str) -> RegistryConfig {
    RegistryConfig {
        hostname: hostname.to_string(),
        sync_period: period.to_string(),
        syncer_script: "/bin/true".to_string(),
        registry_provider: "docker".to_string(),
        ..Default::default()
    }
}

/// In-memory destination registries shared by every syncer a factory builds
#[derive(Clone, Default)]
pub struct FakeRegistries {
    pushed: Arc<Mutex<Vec<String>>>,
    pulled: Arc<Mutex<Vec<String>>>,
}

impl FakeRegistries {
    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    fn contains(&self, image: &str) -> bool {
        self.pushed.lock().unwrap().iter().any(|p| p == image)
    }
}

struct FixedDiscovery(Vec<String>);

#[async_trait]
impl Discovery for FixedDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed image list".to_string()
    }
}

struct FakeOracle {
    registries: FakeRegistries,
    hostname: String,
    repository: String,
}

#[async_trait]
impl ExistenceOracle for FakeOracle {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let destination = retag(image, &self.hostname, &self.repository);
        if is_mutable_tag(split_image_tag(&destination).1) {
            return Ok(false);
        }
        Ok(self.registries.contains(&destination))
    }
}

struct FakeClient {
    registries: FakeRegistries,
}

#[async_trait]
impl RegistryClient for FakeClient {
    async fn pull(
        &self,
        image: &str,
        _auth: Option<&Credentials>,
        _display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.registries.pulled.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn tag(&self, _source: &str, _target: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn push(
        &self,
        image: &str,
        _registry: &str,
        _auth: Option<&Credentials>,
        _display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.registries.pushed.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn remove(&self, _image: &str, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// Builds syncers that discover `images` and transfer into [`FakeRegistries`]
pub struct FakeFactory {
    pub images: Vec<String>,
    pub registries: FakeRegistries,
}

impl FakeFactory {
    pub fn new(images: &[&str]) -> Self {
        Self {
            images: images.iter().map(|s| s.to_string()).collect(),
            registries: FakeRegistries::default(),
        }
    }
}

impl SyncerFactory for FakeFactory {
    fn build(&self, registry: &RegistryConfig, cancel: CancellationToken) -> Result<Syncer> {
        Ok(Syncer::new(
            SyncerSettings::from(registry),
            Box::new(FixedDiscovery(self.images.clone())),
            Box::new(FakeOracle {
                registries: self.registries.clone(),
                hostname: registry.hostname.clone(),
                repository: registry.repository.clone(),
            }),
            Arc::new(FakeClient {
                registries: self.registries.clone(),
            }),
            Arc::new(PlainDisplay),
            cancel,
        ))
    }
}

/// Unique destination references, for counting distinct pushes
pub fn distinct(images: &[String]) -> HashSet<String> {
    images.iter().cloned().collect()
}
