/*!
Mock EMS Backend pour tests sans serveur

Implémente `EmsBackend` en mémoire : catalogue de sites, santé par site,
suggestions, et journal de tous les appels reçus.
Permet de simuler les échecs (mutations, santé), un credential rejeté
et une latence sur le pull de santé.
*/

use async_trait::async_trait;
use helios_sync::models::{Credential, HealthStatus, RlStrategy, Site, Suggestion, SuggestionAction};
use helios_sync::{EmsBackend, SyncError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Token délivré par `login` avec les identifiants par défaut
pub const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Login(String),
    FetchSites,
    FetchHealth(String),
    FetchSuggestions(String),
    Resolve {
        site_id: String,
        suggestion_id: String,
        action: SuggestionAction,
    },
    Acknowledge {
        site_id: String,
        alert_id: String,
    },
    UpdateStrategy {
        site_id: String,
        strategy: RlStrategy,
    },
}

#[derive(Default)]
struct BackendState {
    sites: Vec<Site>,
    health: HashMap<String, HealthStatus>,
    suggestions: HashMap<String, Vec<Suggestion>>,
    fail_mutations: bool,
    fail_health: bool,
    reject_credentials: bool,
    health_delay: Option<Duration>,
    mutation_delay: Option<Duration>,
    calls: Vec<BackendCall>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue de sites nommés "Site {id}"
    pub fn with_sites(ids: &[&str]) -> Self {
        let backend = Self::new();
        backend.set_sites(
            ids.iter()
                .map(|id| Site {
                    id: id.to_string(),
                    name: format!("Site {id}"),
                    config: Default::default(),
                })
                .collect(),
        );
        backend
    }

    pub fn set_sites(&self, sites: Vec<Site>) {
        self.state.lock().sites = sites;
    }

    pub fn set_health(&self, site_id: &str, status: HealthStatus) {
        self.state.lock().health.insert(site_id.to_string(), status);
    }

    pub fn set_suggestions(&self, site_id: &str, suggestions: Vec<Suggestion>) {
        self.state.lock().suggestions.insert(site_id.to_string(), suggestions);
    }

    /// Toutes les mutations (accept/reject, acknowledge, strategy) échouent en HTTP 500
    pub fn fail_mutations(&self, fail: bool) {
        self.state.lock().fail_mutations = fail;
    }

    pub fn fail_health(&self, fail: bool) {
        self.state.lock().fail_health = fail;
    }

    /// Chaque appel authentifié répond 401
    pub fn reject_credentials(&self, reject: bool) {
        self.state.lock().reject_credentials = reject;
    }

    pub fn set_health_delay(&self, delay: Option<Duration>) {
        self.state.lock().health_delay = delay;
    }

    /// Latence appliquée à chaque mutation avant sa réponse
    pub fn set_mutation_delay(&self, delay: Option<Duration>) {
        self.state.lock().mutation_delay = delay;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn health_fetches(&self, site_id: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::FetchHealth(id) if id == site_id))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: BackendCall) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        log::debug!("🧪 [MOCK] backend call {:?}", call);
        state.calls.push(call);
        if state.reject_credentials {
            return Err(SyncError::Unauthorized);
        }
        Ok(())
    }

    async fn mutation_result(&self, context: String) -> Result<(), SyncError> {
        let delay = self.state.lock().mutation_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().fail_mutations {
            log::info!("💥 [MOCK] failing mutation {}", context);
            return Err(SyncError::Http { status: 500, context });
        }
        Ok(())
    }
}

#[async_trait]
impl EmsBackend for MockBackend {
    async fn login(&self, username: &str, password: &str) -> Result<Credential, SyncError> {
        self.state.lock().calls.push(BackendCall::Login(username.to_string()));
        if password.is_empty() || self.state.lock().reject_credentials {
            return Err(SyncError::Unauthorized);
        }
        Ok(Credential::new(TEST_TOKEN))
    }

    async fn fetch_sites(&self, _credential: &Credential) -> Result<Vec<Site>, SyncError> {
        self.record(BackendCall::FetchSites)?;
        Ok(self.state.lock().sites.clone())
    }

    async fn fetch_health_status(&self, _credential: &Credential, site_id: &str) -> Result<HealthStatus, SyncError> {
        self.record(BackendCall::FetchHealth(site_id.to_string()))?;
        let delay = self.state.lock().health_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        if state.fail_health {
            return Err(SyncError::Transport("connection reset".into()));
        }
        Ok(state.health.get(site_id).cloned().unwrap_or_default())
    }

    async fn fetch_suggestions(&self, _credential: &Credential, site_id: &str) -> Result<Vec<Suggestion>, SyncError> {
        self.record(BackendCall::FetchSuggestions(site_id.to_string()))?;
        Ok(self.state.lock().suggestions.get(site_id).cloned().unwrap_or_default())
    }

    async fn resolve_suggestion(
        &self,
        _credential: &Credential,
        site_id: &str,
        suggestion_id: &str,
        action: SuggestionAction,
    ) -> Result<(), SyncError> {
        self.record(BackendCall::Resolve {
            site_id: site_id.to_string(),
            suggestion_id: suggestion_id.to_string(),
            action,
        })?;
        self.mutation_result(format!("/sites/{site_id}/suggestions/{suggestion_id}/{}", action.as_str()))
            .await
    }

    async fn acknowledge_alert(&self, _credential: &Credential, site_id: &str, alert_id: &str) -> Result<(), SyncError> {
        self.record(BackendCall::Acknowledge {
            site_id: site_id.to_string(),
            alert_id: alert_id.to_string(),
        })?;
        self.mutation_result(format!("/sites/{site_id}/alerts/{alert_id}/acknowledge"))
            .await
    }

    async fn update_strategy(&self, _credential: &Credential, site_id: &str, strategy: &RlStrategy) -> Result<(), SyncError> {
        self.record(BackendCall::UpdateStrategy {
            site_id: site_id.to_string(),
            strategy: *strategy,
        })?;
        self.mutation_result(format!("/sites/{site_id}/rl-strategy")).await
    }
}
