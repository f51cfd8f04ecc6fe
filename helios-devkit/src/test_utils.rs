/*!
Test Harness pour la couche de synchronisation Helios

Facilite l'écriture de tests d'intégration avec:
- Setup automatique d'une SyncSession branchée sur les mocks (backend, live, persistance)
- Config accélérée (reconnexion en ms, poll court)
- Attentes sur l'état publié et sur le statut de connexion
*/

use crate::backend_stub::{MockBackend, TEST_TOKEN};
use crate::live_stub::MockLiveTransport;
use anyhow::{bail, Result};
use helios_sync::models::{ConnectionStatus, Credential};
use helios_sync::{MemoryStateStore, StoreView, SyncConfig, SyncSession};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Harness complet : session réelle, collaborateurs simulés
pub struct TestHarness {
    pub backend: MockBackend,
    pub live: MockLiveTransport,
    pub persisted: MemoryStateStore,
    pub session: SyncSession,
}

impl TestHarness {
    /// Catalogue de sites "1" et "2", aucune donnée persistée
    pub fn new() -> Result<Self> {
        Self::with_parts(MockBackend::with_sites(&["1", "2"]), MemoryStateStore::new())
    }

    pub fn with_parts(backend: MockBackend, persisted: MemoryStateStore) -> Result<Self> {
        Self::with_config(Self::fast_config(), backend, persisted)
    }

    pub fn with_config(config: SyncConfig, backend: MockBackend, persisted: MemoryStateStore) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let live = MockLiveTransport::new();
        let session = SyncSession::new(
            config,
            Arc::new(backend.clone()),
            Arc::new(live.clone()),
            Arc::new(persisted.clone()),
        )?;
        Ok(Self {
            backend,
            live,
            persisted,
            session,
        })
    }

    /// Reconnexion 10ms -> 80ms, poll toutes les 200ms
    pub fn fast_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.live.reconnect_initial_ms = 10;
        config.live.reconnect_max_ms = 80;
        config.poller.interval_ms = 200;
        config.poller.stale_after_ms = 600;
        config
    }

    /// Ouvre une session avec le token de test
    pub async fn login(&self) -> Result<()> {
        self.session
            .set_credential(Some(Credential::new(TEST_TOKEN)))
            .await?;
        log::info!("🔑 Test session opened");
        Ok(())
    }

    /// Login + sélection d'un site + connexion live établie
    pub async fn login_and_select(&self, site_id: &str) -> Result<()> {
        self.login().await?;
        self.session.select_site(Some(site_id)).await?;
        if !self.live.wait_for_site(site_id, 2000).await {
            bail!("live channel for site {} never opened", site_id);
        }
        self.wait_for_status(ConnectionStatus::Connected, 2000).await
    }

    /// Pousse une trame sur le canal live courant
    pub fn push(&self, frame: &Value) -> Result<()> {
        if !self.live.send_json(frame) {
            bail!("no live connection to push to");
        }
        Ok(())
    }

    /// Attend que l'état publié satisfasse `predicate`
    pub async fn wait_until<F>(&self, timeout_ms: u64, predicate: F) -> Result<StoreView>
    where
        F: Fn(&StoreView) -> bool,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let view = self.session.view();
            if predicate(&view) {
                return Ok(view);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("store never reached expected state within {}ms", timeout_ms)
    }

    pub async fn wait_for_status(&self, status: ConnectionStatus, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.session.connection_status() == status {
                log::info!("✅ Connection status is {}", status.as_str());
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!(
            "connection status stayed {} instead of {}",
            self.session.connection_status().as_str(),
            status.as_str()
        )
    }
}
