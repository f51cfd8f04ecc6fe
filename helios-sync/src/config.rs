use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Intervalle minimal accepté pour le poller : évite une boucle serrée sur une config à 0
const MIN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConf,
    pub live: LiveConf,
    pub poller: PollerConf,
    pub alerts: AlertConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConf {
    pub base_url: String, // ex: "http://127.0.0.1:8000/api/v1"
    pub request_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LiveConf {
    pub base_url: String, // ex: "ws://127.0.0.1:8000" -> {base}/ws/site/{id}?token=...
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Délai max du handshake ; au-delà, la tentative compte comme un échec (backoff)
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollerConf {
    pub interval_ms: u64,
    /// Âge au-delà duquel le snapshot santé est signalé comme périmé
    pub stale_after_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AlertConf {
    /// false = comportement historique (une alerte reçue deux fois est insérée deux fois)
    pub dedupe_by_id: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConf::default(),
            live: LiveConf::default(),
            poller: PollerConf::default(),
            alerts: AlertConf::default(),
        }
    }
}

impl Default for ApiConf {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/v1".into(),
            request_timeout_ms: 15_000,
        }
    }
}

impl Default for LiveConf {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8000".into(),
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for PollerConf {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            stale_after_ms: 180_000,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.api.base_url.trim().is_empty() || self.live.base_url.trim().is_empty() {
            return Err(SyncError::Config("api and live base urls are required".into()));
        }
        if self.poller.interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(SyncError::Config(format!(
                "poller.interval_ms must be >= {MIN_POLL_INTERVAL_MS}"
            )));
        }
        if self.live.reconnect_initial_ms == 0 {
            return Err(SyncError::Config("live.reconnect_initial_ms must be > 0".into()));
        }
        if self.live.connect_timeout_ms == 0 {
            return Err(SyncError::Config("live.connect_timeout_ms must be > 0".into()));
        }
        if self.live.reconnect_max_ms < self.live.reconnect_initial_ms {
            return Err(SyncError::Config(
                "live.reconnect_max_ms must be >= live.reconnect_initial_ms".into(),
            ));
        }
        Ok(())
    }

    /// Variables d'environnement prioritaires sur le fichier (HELIOS_API_URL, HELIOS_LIVE_URL)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HELIOS_API_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("HELIOS_LIVE_URL") {
            if !url.trim().is_empty() {
                self.live.base_url = url;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.live.connect_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.poller.stale_after_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }
}

/// Charge la config YAML (HELIOS_SYNC_CONFIG, défaut helios.yaml) ; défauts si absente ou invalide
pub async fn load_config() -> SyncConfig {
    // .env optionnel, ok s'il n'existe pas
    dotenvy::dotenv().ok();

    let path = std::env::var("HELIOS_SYNC_CONFIG").unwrap_or_else(|_| "helios.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        info!("[config] no {path}, using default config");
        SyncConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}

fn parse_config(txt: &str) -> SyncConfig {
    if txt.trim().is_empty() {
        return SyncConfig::default();
    }
    match serde_yaml::from_str::<SyncConfig>(txt) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("[config] invalid config: {e}");
            SyncConfig::default()
        }
    }
}
