//! Registry catalog - the immutable set of configured registries
//!
//! Built once at startup from the configuration file. Hostnames are unique; a repeated
//! hostname is rejected before anything is scheduled.

use std::collections::HashSet;

use crate::config::RegistryConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default)]
pub struct RegistryCatalog {
    registries: Vec<RegistryConfig>,
}

impl RegistryCatalog {
    pub fn new(registries: Vec<RegistryConfig>) -> Result<Self> {
        check_unique_hostnames(&registries)?;
        Ok(Self { registries })
    }

    pub fn get(&self, hostname: &str) -> Result<&RegistryConfig> {
        self.registries
            .iter()
            .find(|registry| registry.hostname == hostname)
            .ok_or_else(|| SyncError::RegistryNotFound(hostname.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryConfig> {
        self.registries.iter()
    }

    pub fn registries(&self) -> &[RegistryConfig] {
        &self.registries
    }

    pub fn hostnames(&self) -> Vec<&str> {
        self.registries.iter().map(|r| r.hostname.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

/// Fail on the first hostname that appears twice
pub fn check_unique_hostnames(registries: &[RegistryConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for registry in registries {
        if !seen.insert(registry.hostname.as_str()) {
            return Err(SyncError::DuplicateRegistry(registry.hostname.clone()));
        }
    }
    Ok(())
}
