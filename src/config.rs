use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::display::DisplayMode;

/// File name looked up in the working directory and the XDG config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Main configuration structure for picture-book
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Registries to keep in sync
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,

    /// How pull/push progress is rendered
    #[serde(default)]
    pub display: DisplayMode,

    /// Control plane settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A single destination registry and where its images come from
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Hostname of the registry, not including the scheme
    pub hostname: String,

    /// Prefix added to retagged images, denoting a base repository
    #[serde(default)]
    pub repository: String,

    /// `username:password` used when pushing to this registry
    #[serde(default, skip_serializing)]
    pub push_auth_config: String,

    /// `username:password` used when pulling source images
    #[serde(default, skip_serializing)]
    pub pull_auth_config: String,

    /// Cron expression driving the sync job
    pub sync_period: String,

    /// Script that prints the images to sync, one per line
    pub syncer_script: String,

    /// Whitespace separated arguments passed to the syncer script
    #[serde(default)]
    pub syncer_script_args: String,

    /// Type of registry (docker / harbor), informational
    #[serde(default)]
    pub registry_provider: String,

    /// Remove pulled and retagged images once they have been pushed
    #[serde(default)]
    pub delete_local_images: bool,

    /// Query the tag list over plain http
    #[serde(default)]
    pub insecure: bool,
}

/// HTTP control plane configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Require `Authorization: Bearer <authToken>` on every request
    #[serde(default)]
    pub enable_auth: bool,

    #[serde(default, skip_serializing)]
    pub auth_token: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "json"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_port(),
            enable_auth: false,
            auth_token: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Resolve the configuration file: an explicit path, `./config.yaml`, then the XDG location
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        let default_path = Self::default_config_path()?;
        if default_path.exists() {
            return Ok(default_path);
        }

        bail!(
            "No configuration found, looked for ./{} and {:?}",
            CONFIG_FILE_NAME,
            default_path
        )
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("picture-book").join(CONFIG_FILE_NAME))
    }

    /// Expand `~` and environment variables in syncer script paths
    pub fn expand_paths(&mut self) -> Result<()> {
        for registry in &mut self.registries {
            registry.syncer_script = shellexpand::full(&registry.syncer_script)
                .with_context(|| {
                    format!("Failed to expand syncerScript for {}", registry.hostname)
                })?
                .into_owned();
        }

        Ok(())
    }

    /// Field-level checks; hostname uniqueness is enforced by the registry catalog
    pub fn validate(&self) -> Result<()> {
        for (index, registry) in self.registries.iter().enumerate() {
            if registry.hostname.trim().is_empty() {
                bail!("Registry #{} has an empty hostname", index + 1);
            }
            if registry.syncer_script.trim().is_empty() {
                bail!("Registry {} has no syncerScript", registry.hostname);
            }
        }

        if self.api.enabled && self.api.enable_auth && self.api.auth_token.is_empty() {
            bail!("api.enableAuth is set but api.authToken is empty");
        }

        Ok(())
    }
}
