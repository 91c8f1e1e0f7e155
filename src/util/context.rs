//! Global context for provider acquisition operations.
//!
//! Centralizes access to configuration and cache paths, the way every
//! operation (`available_versions`, `package_meta`, `install`) needs them.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::util::Config;

static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("org", "opentofu", "provider-install"));

/// Global context containing configuration and cache paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    cwd: PathBuf,
    home: PathBuf,
    config: Config,
}

impl GlobalContext {
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let home = if let Some(dirs) = PROJECT_DIRS.as_ref() {
            dirs.cache_dir().to_path_buf()
        } else {
            std::env::var_os("HOME")
                .or_else(|| std::env::var_os("USERPROFILE"))
                .map(|h| PathBuf::from(h).join(".provider-install"))
                .unwrap_or_else(|| PathBuf::from(".provider-install"))
        };

        let config = crate::util::config::load_config(
            &home.join("config.toml"),
            &cwd.join(".provider-install").join("config.toml"),
        );

        Ok(GlobalContext { cwd, home, config })
    }

    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cache directory for downloaded provider archives and registry
    /// responses.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn plugin_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("plugins")
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create directory: {}", path.display()))?;
        }
        Ok(())
    }
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self::new().expect("failed to create default GlobalContext")
    }
}
