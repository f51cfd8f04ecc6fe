/**
 * SESSION / SCOPE LIFECYCLE - Orchestration login, logout et changement de site
 *
 * RÔLE :
 * Possède explicitement le store, la connexion live, le poller, le dispatcher et
 * le coordinateur d'actions. Seul composant qui démarre et arrête les producteurs.
 *
 * FONCTIONNEMENT :
 * - set_credential(Some) : nouvelle session, token persisté, catalogue chargé,
 *   puis site persisté restauré s'il existe encore dans le catalogue
 * - set_credential(None) / logout : connexion fermée, poller arrêté, tout l'état
 *   effacé en une seule publication, clés persistées supprimées
 * - select_site : arrêt des producteurs, scope vidé + nouvelle sélection en une
 *   publication, id persisté, puis poller + connexion démarrés sur le nouveau scope
 * - Les transitions sont sérialisées par un verrou async
 * - Un 401/403 remonté par la connexion, le poller ou une action termine la session
 *
 * UTILITÉ :
 * Aucun état global : la console et les tests instancient chacun leur SyncSession.
 */

use crate::actions::{ActionCoordinator, Resolution};
use crate::api::EmsBackend;
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ReconnectPolicy};
use crate::dispatcher::EventDispatcher;
use crate::error::SyncError;
use crate::health::{SyncHealth, SyncHealthTracker};
use crate::models::{ConnectionStatus, Credential, RlStrategy, Site, SuggestionAction};
use crate::persist::{ClientStateStore, PersistedKey};
use crate::poller::SnapshotPoller;
use crate::store::{ReconciledStore, StoreView};
use crate::transport::LiveTransport;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Signal remonté par les producteurs asynchrones vers le lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// Le backend a rejeté ce credential : la session doit se terminer
    Unauthorized { credential: Credential },
}

struct SessionCore {
    config: SyncConfig,
    store: ReconciledStore,
    backend: Arc<dyn EmsBackend>,
    persisted: Arc<dyn ClientStateStore>,
    connection: ConnectionManager,
    poller: SnapshotPoller,
    actions: ActionCoordinator,
    health: SyncHealthTracker,
    transition: AsyncMutex<()>,
}

pub struct SyncSession {
    core: Arc<SessionCore>,
    pumps: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// Doit être appelé depuis un runtime tokio (lance le dispatcher et la pompe de signaux)
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn EmsBackend>,
        transport: Arc<dyn LiveTransport>,
        persisted: Arc<dyn ClientStateStore>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let health = SyncHealthTracker::new();

        let policy = ReconnectPolicy::new(
            std::time::Duration::from_millis(config.live.reconnect_initial_ms),
            std::time::Duration::from_millis(config.live.reconnect_max_ms),
        );
        let connection = ConnectionManager::new(transport, frames_tx, signals_tx.clone(), policy, health.clone());
        let store = ReconciledStore::new(connection.subscribe(), config.alerts.dedupe_by_id);
        let dispatcher = EventDispatcher::new(store.clone(), health.clone());
        let poller = SnapshotPoller::new(
            backend.clone(),
            store.clone(),
            signals_tx.clone(),
            health.clone(),
            config.poll_interval(),
        );
        let actions = ActionCoordinator::new(store.clone(), backend.clone(), signals_tx);

        let core = Arc::new(SessionCore {
            config,
            store,
            backend,
            persisted,
            connection,
            poller,
            actions,
            health,
            transition: AsyncMutex::new(()),
        });

        let pumps = vec![
            tokio::spawn(dispatcher.run(frames_rx)),
            tokio::spawn(signal_pump(Arc::downgrade(&core), signals_rx)),
        ];
        info!("[session] sync session ready (api {}, live {})", core.config.api.base_url, core.config.live.base_url);
        Ok(Self { core, pumps })
    }

    // ===== Lecture =====

    pub fn store(&self) -> &ReconciledStore {
        &self.core.store
    }

    pub fn view(&self) -> StoreView {
        self.core.store.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreView> {
        self.core.store.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.core.connection.status()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.core.connection.subscribe()
    }

    pub fn health(&self) -> SyncHealth {
        self.core
            .health
            .get_health(&self.core.store, self.core.config.stale_after())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }

    // ===== Session =====

    /// Reprend la session persistée ; Ok(false) si aucun token n'est stocké
    pub async fn restore(&self) -> Result<bool, SyncError> {
        let token = self.core.persisted.load(PersistedKey::BearerToken)?;
        match token.map(Credential::new).filter(|c| !c.is_empty()) {
            Some(credential) => {
                info!("[session] restoring persisted session");
                self.core.set_credential(Some(credential)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), SyncError> {
        let credential = self.core.backend.login(username, password).await?;
        info!("[session] logged in as {username}");
        self.core.set_credential(Some(credential)).await
    }

    pub async fn set_credential(&self, credential: Option<Credential>) -> Result<(), SyncError> {
        self.core.set_credential(credential).await
    }

    pub async fn logout(&self) {
        self.core.logout().await;
    }

    // ===== Scope =====

    pub async fn select_site(&self, site_id: Option<&str>) -> Result<(), SyncError> {
        self.core.select_site(site_id).await
    }

    pub async fn reload_catalogue(&self) -> Result<(), SyncError> {
        self.core.reload_catalogue().await
    }

    /// Remplace la séquence de suggestions par la liste REST du site courant
    pub async fn refresh_suggestions(&self) -> Result<(), SyncError> {
        let Some((scope, token)) = self.core.store.current_scope() else {
            return Ok(());
        };
        match self.core.backend.fetch_suggestions(&scope.credential, &scope.site_id).await {
            Ok(suggestions) => {
                if !self.core.store.set_suggestions(token.epoch, suggestions) {
                    debug!("[session] suggestion list for site {} arrived after scope change", scope.site_id);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_auth_failure() {
                    self.core.logout_if_current(&scope.credential).await;
                }
                Err(e)
            }
        }
    }

    // ===== Actions optimistes =====

    pub async fn resolve_suggestion(&self, suggestion_id: &str, action: SuggestionAction) -> Result<Resolution, SyncError> {
        self.core.actions.resolve_suggestion(suggestion_id, action).await
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<Resolution, SyncError> {
        self.core.actions.acknowledge_alert(alert_id).await
    }

    pub async fn update_strategy(&self, strategy: RlStrategy) -> Result<Resolution, SyncError> {
        self.core.actions.update_strategy(strategy).await
    }

    /// Arrête les producteurs ; l'état du store reste lisible
    pub async fn shutdown(mut self) {
        {
            let _guard = self.core.transition.lock().await;
            self.core.stop_producers();
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        info!("[session] sync session stopped");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl SessionCore {
    fn stop_producers(&self) {
        self.poller.stop();
        self.connection.close();
    }

    /// Démarre poller + connexion si un scope complet existe
    fn start_producers(&self) {
        if let Some((scope, token)) = self.store.current_scope() {
            self.poller.start(scope.clone(), token.epoch);
            self.connection.open(scope, token.epoch);
        }
    }

    fn persist(&self, key: PersistedKey, value: Option<&str>) {
        let result = match value {
            Some(v) => self.persisted.store(key, v),
            None => self.persisted.remove(key),
        };
        if let Err(e) = result {
            warn!("[session] could not persist {}: {e}", key.as_str());
        }
    }

    async fn set_credential(&self, credential: Option<Credential>) -> Result<(), SyncError> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            self.logout().await;
            return Ok(());
        };

        let _guard = self.transition.lock().await;
        self.stop_producers();
        self.store.begin_session(credential.clone());
        self.persist(PersistedKey::BearerToken, Some(credential.as_str()));

        let sites = match self.backend.fetch_sites(&credential).await {
            Ok(sites) => sites,
            Err(e) if e.is_auth_failure() => {
                warn!("[session] credential rejected while loading sites");
                self.clear_session();
                return Err(e);
            }
            Err(e) => {
                warn!("[session] failed to load site catalogue: {e}");
                return Err(e);
            }
        };
        info!("[session] catalogue loaded ({} sites)", sites.len());
        self.store.set_catalogue(sites);

        let persisted_site = match self.persisted.load(PersistedKey::SelectedSiteId) {
            Ok(id) => id,
            Err(e) => {
                warn!("[session] could not read persisted site: {e}");
                None
            }
        };
        if let Some(site_id) = persisted_site {
            match self.store.site_in_catalogue(&site_id) {
                Some(site) => {
                    info!("[session] restoring selected site {}", site.id);
                    self.store.select_site(Some(site));
                    self.start_producers();
                }
                None => debug!("[session] persisted site {site_id} not in catalogue, selection stays empty"),
            }
        }
        Ok(())
    }

    async fn logout(&self) {
        let _guard = self.transition.lock().await;
        self.clear_session();
    }

    /// Logout seulement si la session courante porte encore ce credential
    async fn logout_if_current(&self, credential: &Credential) {
        let _guard = self.transition.lock().await;
        if self.store.credential().as_ref() == Some(credential) {
            warn!("[session] credential rejected by backend, ending session");
            self.clear_session();
        } else {
            debug!("[session] ignoring rejection of a previous credential");
        }
    }

    /// À appeler sous le verrou de transition
    fn clear_session(&self) {
        self.stop_producers();
        self.store.reset();
        self.persist(PersistedKey::BearerToken, None);
        self.persist(PersistedKey::SelectedSiteId, None);
        info!("[session] logged out");
    }

    async fn select_site(&self, site_id: Option<&str>) -> Result<(), SyncError> {
        let _guard = self.transition.lock().await;
        if !self.store.view().session.authenticated {
            return Err(SyncError::NotAuthenticated);
        }
        let site = match site_id {
            Some(id) => Some(
                self.store
                    .site_in_catalogue(id)
                    .ok_or_else(|| SyncError::UnknownSite(id.to_string()))?,
            ),
            None => None,
        };
        self.activate(site);
        Ok(())
    }

    /// Bascule de scope sous le verrou de transition
    fn activate(&self, site: Option<Site>) {
        self.stop_producers();
        let site_id = site.as_ref().map(|s| s.id.clone());
        self.store.select_site(site);
        self.persist(PersistedKey::SelectedSiteId, site_id.as_deref());
        match site_id {
            Some(id) => info!("[session] site {id} selected"),
            None => info!("[session] site selection cleared"),
        }
        self.start_producers();
    }

    async fn reload_catalogue(&self) -> Result<(), SyncError> {
        let _guard = self.transition.lock().await;
        let Some(credential) = self.store.credential() else {
            return Err(SyncError::NotAuthenticated);
        };
        let sites = match self.backend.fetch_sites(&credential).await {
            Ok(sites) => sites,
            Err(e) => {
                if e.is_auth_failure() {
                    warn!("[session] credential rejected while reloading sites");
                    self.clear_session();
                }
                return Err(e);
            }
        };
        self.store.set_catalogue(sites);

        if let Some(selected) = self.store.selected_site() {
            if self.store.site_in_catalogue(&selected.id).is_none() {
                warn!("[session] selected site {} left the catalogue", selected.id);
                self.activate(None);
            }
        }
        Ok(())
    }
}

async fn signal_pump(core: Weak<SessionCore>, mut signals: mpsc::UnboundedReceiver<SessionSignal>) {
    while let Some(signal) = signals.recv().await {
        let Some(core) = core.upgrade() else {
            return;
        };
        match signal {
            SessionSignal::Unauthorized { credential } => core.logout_if_current(&credential).await,
        }
    }
}
