//! Image discovery abstraction layer
//!
//! A discovery source enumerates the image references a registry should hold. The
//! production source is a user supplied executable; tests plug in fixed lists.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::{Result, SyncError};

/// Trait for image discovery from various sources
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Image references in the order they should be processed, blank entries removed
    async fn discover(&self) -> Result<Vec<String>>;

    /// Short description for logging
    fn describe(&self) -> String;
}

/// Runs an external script and reads image references from its output
#[derive(Debug, Clone)]
pub struct ScriptDiscovery {
    script: String,
    args: String,
}

impl ScriptDiscovery {
    pub fn new(script: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            args: args.into(),
        }
    }

    pub fn from_registry(registry: &RegistryConfig) -> Self {
        Self::new(&registry.syncer_script, &registry.syncer_script_args)
    }

    fn failure(&self, message: impl Into<String>) -> SyncError {
        SyncError::Discovery {
            script: self.script.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Discovery for ScriptDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        info!("Executing {}", self.script);
        debug!("Syncer script arguments: {:?}", self.args);

        let output = AsyncCommand::new(&self.script)
            .args(self.args.split_whitespace())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(self.failure(format!("{}: {}", output.status, combined.trim())));
        }

        Ok(parse_image_list(&combined))
    }

    fn describe(&self) -> String {
        format!("script {}", self.script)
    }
}

/// Split script output into image references, dropping blank lines
pub fn parse_image_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
