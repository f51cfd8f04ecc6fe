//! Console configuration with secure token storage
//!
//! Handles:
//! - Backend endpoints (REST + live channel)
//! - Where the session token lives (OS keyring or state file)
//! - Cross-platform storage under the OS config directory

use anyhow::{Context, Result};
use helios_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_DIR: &str = "helios-console";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub backend: BackendConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Overrides `api.base_url` from the sync config when set
    pub api_url: Option<String>,
    /// Overrides `live.base_url` from the sync config when set
    pub live_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Keep the bearer token in the OS keyring instead of the state file
    pub use_keyring: bool,
    pub state_file: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                api_url: None,
                live_url: None,
                poll_interval_secs: None,
            },
            storage: StorageConfig {
                use_keyring: true,
                state_file: None,
            },
        }
    }
}

impl ConsoleConfig {
    /// Load config from OS-specific location, writing defaults on first run
    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?).await
    }

    pub async fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = tokio::fs::read_to_string(config_path)
                .await
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: ConsoleConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            // best effort: the console runs on defaults either way
            match config.save_to(config_path).await {
                Ok(()) => info!("Wrote default config to {}", config_path.display()),
                Err(e) => warn!("Could not write default config: {e:#}"),
            }
            Ok(config)
        }
    }

    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(config_path, content)
            .await
            .with_context(|| format!("writing {}", config_path.display()))?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push(APP_DIR);
        path.push("config.toml");
        Ok(path)
    }

    /// State file holding the selected site (and the token when the keyring is off)
    pub fn state_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.state_file {
            return Ok(path.clone());
        }
        let mut path = dirs::data_local_dir()
            .or_else(dirs::config_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        path.push(APP_DIR);
        path.push("state.json");
        Ok(path)
    }

    /// Layer the console overrides on top of the sync config
    pub fn apply_to(&self, sync: &mut SyncConfig) {
        if let Some(url) = &self.backend.api_url {
            sync.api.base_url = url.clone();
        }
        if let Some(url) = &self.backend.live_url {
            sync.live.base_url = url.clone();
        }
        if let Some(secs) = self.backend.poll_interval_secs {
            sync.poller.interval_ms = secs.saturating_mul(1000);
        }
    }
}
