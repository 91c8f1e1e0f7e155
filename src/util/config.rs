//! Configuration file support.
//!
//! Two configuration file locations, project overriding global:
//! - Global: `~/.config/provider-install/config.toml` (user-wide defaults)
//! - Project: `.provider-install/config.toml` (project-specific overrides)

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::SigningPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub signing: SigningConfig,
    pub mapping_files: Vec<String>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum retries for a single registry/mirror HTTP operation.
    pub max_retries: Option<u32>,

    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,

    /// Offline mode -- refuse any network source, forcing filesystem
    /// mirrors and direct-install only.
    #[serde(default)]
    pub offline: bool,
}

/// OpenPGP signature enforcement configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub enforce_on_default_registry: bool,
    pub enforce_key_expiration: bool,
}

impl SigningConfig {
    pub fn to_policy(&self) -> SigningPolicy {
        SigningPolicy {
            enforce_on_default_registry: self.enforce_on_default_registry,
            enforce_key_expiration: self.enforce_key_expiration,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one; `other` takes precedence.
    pub fn merge(&mut self, other: Config) {
        if other.network.max_retries.is_some() {
            self.network.max_retries = other.network.max_retries;
        }
        if other.network.connect_timeout_secs.is_some() {
            self.network.connect_timeout_secs = other.network.connect_timeout_secs;
        }
        if other.network.offline {
            self.network.offline = true;
        }
        if other.signing.enforce_on_default_registry {
            self.signing.enforce_on_default_registry = true;
        }
        if other.signing.enforce_key_expiration {
            self.signing.enforce_key_expiration = true;
        }
        if !other.mapping_files.is_empty() {
            self.mapping_files = other.mapping_files;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Precedence (highest to lowest): project config, global config, defaults.
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }
    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}
