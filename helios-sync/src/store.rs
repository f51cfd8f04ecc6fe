/**
 * STORE RÉCONCILIÉ - Source de vérité unique côté client
 *
 * RÔLE :
 * Fusionne les snapshots du poller, les événements push et les mutations
 * optimistes en un seul état cohérent. Seul composant autorisé à muter l'état partagé.
 *
 * FONCTIONNEMENT :
 * - Toute mutation prend l'unique verrou, s'applique en entier, puis publie un
 *   nouveau StoreView complet (watch) : aucun état à moitié appliqué n'est observable
 * - Chaque changement de scope (site, login, logout) incrémente l'epoch
 * - Les producteurs asynchrones taguent leurs résultats avec l'epoch de départ ;
 *   un résultat d'un epoch périmé est jeté à l'arrivée
 *
 * INVARIANTS :
 * - clear_site_scope remet santé, télémétrie, alertes et suggestions à zéro ensemble
 * - select_site(None) et select_site(Some) vident le scope dans la même étape
 *   que l'établissement de la nouvelle sélection
 * - le statut de connexion est en lecture seule ici (propriété du ConnectionManager)
 */

use crate::actions::OptimisticCommand;
use crate::dispatcher::SiteEvent;
use crate::models::{
    Alert, ConnectionStatus, Credential, HealthStatus, RlStrategy, Scope, Session, Site, SiteId,
    Suggestion, SuggestionStatus, Telemetry,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

type Shared<T> = Arc<Mutex<T>>;

pub type Epoch = u64;

/// Données liées au site sélectionné, remises à zéro d'un bloc
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteData {
    pub health: Option<HealthStatus>,
    pub health_updated_at: Option<DateTime<Utc>>,
    pub telemetry: Option<Telemetry>,
    /// Plus récente en tête
    pub alerts: Vec<Alert>,
    /// Plus récente en tête
    pub suggestions: Vec<Suggestion>,
}

/// Jeton de scope capturé au début d'une opération asynchrone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeToken {
    pub epoch: Epoch,
    pub session: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Unknown,
}

/// Snapshot immuable de l'état, tel que lu par la présentation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreView {
    pub revision: u64,
    pub epoch: Epoch,
    pub session_generation: u64,
    pub session: Session,
    pub catalogue: BTreeMap<SiteId, Site>,
    pub selected_site: Option<Site>,
    pub site: SiteData,
    pub strategy: RlStrategy,
}

impl StoreView {
    pub fn token(&self) -> ScopeToken {
        ScopeToken {
            epoch: self.epoch,
            session: self.session_generation,
        }
    }

    pub fn suggestion(&self, id: &str) -> Option<&Suggestion> {
        self.site.suggestions.iter().find(|s| s.id == id)
    }

    /// Première suggestion encore en attente (la plus récente)
    pub fn latest_pending_suggestion(&self) -> Option<&Suggestion> {
        self.site
            .suggestions
            .iter()
            .find(|s| s.status == SuggestionStatus::Pending)
    }

    pub fn health_freshness(&self, now: DateTime<Utc>, max_age: Duration) -> Freshness {
        let Some(updated_at) = self.site.health_updated_at else {
            return Freshness::Unknown;
        };
        match (now - updated_at).to_std() {
            Ok(age) if age > max_age => Freshness::Stale,
            // horloge qui recule : considéré frais
            _ => Freshness::Fresh,
        }
    }
}

#[derive(Clone)]
pub struct ReconciledStore {
    state: Shared<StoreView>,
    published: Arc<watch::Sender<StoreView>>,
    connection: watch::Receiver<ConnectionStatus>,
    dedupe_alerts: bool,
}

impl ReconciledStore {
    pub fn new(connection: watch::Receiver<ConnectionStatus>, dedupe_alerts: bool) -> Self {
        let initial = StoreView::default();
        let (published, _) = watch::channel(initial.clone());
        Self {
            state: Arc::new(Mutex::new(initial)),
            published: Arc::new(published),
            connection,
            dedupe_alerts,
        }
    }

    /// Applique `f` sous le verrou ; publie un nouveau snapshot seulement si `f` a muté (Some)
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreView) -> Option<R>) -> Option<R> {
        let mut state = self.state.lock();
        let out = f(&mut state)?;
        state.revision += 1;
        // publication sous verrou : l'ordre des snapshots suit l'ordre des mutations
        self.published.send_replace(state.clone());
        Some(out)
    }

    // ===== Lecture =====

    pub fn view(&self) -> StoreView {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreView> {
        self.published.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.clone()
    }

    pub fn epoch(&self) -> Epoch {
        self.state.lock().epoch
    }

    pub fn selected_site(&self) -> Option<Site> {
        self.state.lock().selected_site.clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.state.lock().session.credential.clone()
    }

    pub fn site_in_catalogue(&self, site_id: &str) -> Option<Site> {
        self.state.lock().catalogue.get(site_id).cloned()
    }

    /// Scope courant + jeton, lus atomiquement
    pub fn current_scope(&self) -> Option<(Scope, ScopeToken)> {
        let state = self.state.lock();
        let site = state.selected_site.as_ref()?;
        let credential = state.session.credential.as_ref()?;
        let scope = Scope::new(&site.id, credential)?;
        Some((scope, state.token()))
    }

    // ===== Session =====

    /// Ouvre une session neuve : tout l'état précédent disparaît dans la même étape
    pub fn begin_session(&self, credential: Credential) -> Epoch {
        self.mutate(|state| {
            let next = StoreView {
                revision: state.revision,
                epoch: state.epoch + 1,
                session_generation: state.session_generation + 1,
                session: Session {
                    authenticated: true,
                    credential: Some(credential),
                },
                ..StoreView::default()
            };
            *state = next;
            Some(state.epoch)
        })
        .unwrap_or_default()
    }

    /// Logout : session, catalogue, sélection, données du site et poids remis à zéro d'un bloc
    pub fn reset(&self) -> Epoch {
        self.mutate(|state| {
            let next = StoreView {
                revision: state.revision,
                epoch: state.epoch + 1,
                session_generation: state.session_generation + 1,
                ..StoreView::default()
            };
            *state = next;
            Some(state.epoch)
        })
        .unwrap_or_default()
    }

    pub fn set_catalogue(&self, sites: Vec<Site>) {
        self.mutate(|state| {
            if !state.session.authenticated {
                return None;
            }
            state.catalogue = sites.into_iter().map(|s| (s.id.clone(), s)).collect();
            Some(())
        });
    }

    // ===== Scope site =====

    /// Vide le scope et établit la nouvelle sélection en une seule publication
    pub fn select_site(&self, site: Option<Site>) -> Epoch {
        self.mutate(|state| {
            let authenticated = state.session.authenticated;
            state.site = SiteData::default();
            state.epoch += 1;
            state.selected_site = site.filter(|_| authenticated);
            Some(state.epoch)
        })
        .unwrap_or_default()
    }

    pub fn clear_site_scope(&self) -> Epoch {
        self.mutate(|state| {
            state.site = SiteData::default();
            state.epoch += 1;
            Some(state.epoch)
        })
        .unwrap_or_default()
    }

    /// Remplacement complet du snapshot santé ; false si l'epoch est périmé
    pub fn set_health_status(&self, epoch: Epoch, status: HealthStatus) -> bool {
        self.mutate(|state| {
            if !accepts(state, epoch) {
                debug!("[store] discarding health snapshot for stale epoch {epoch}");
                return None;
            }
            state.site.health = Some(status);
            state.site.health_updated_at = Some(Utc::now());
            Some(())
        })
        .is_some()
    }

    pub fn apply_event(&self, epoch: Epoch, event: SiteEvent) -> bool {
        let dedupe = self.dedupe_alerts;
        self.mutate(|state| {
            if !accepts(state, epoch) {
                return None;
            }
            match event {
                SiteEvent::Telemetry(telemetry) => {
                    state.site.telemetry = Some(telemetry);
                }
                SiteEvent::Alert(alert) => {
                    if dedupe {
                        state.site.alerts.retain(|a| a.id != alert.id);
                    }
                    state.site.alerts.insert(0, alert);
                }
                SiteEvent::Suggestion(mut suggestion) => {
                    suggestion.status = SuggestionStatus::Pending;
                    state.site.suggestions.insert(0, suggestion);
                }
            }
            Some(())
        })
        .is_some()
    }

    pub fn set_suggestions(&self, epoch: Epoch, suggestions: Vec<Suggestion>) -> bool {
        self.mutate(|state| {
            if !accepts(state, epoch) {
                return None;
            }
            state.site.suggestions = suggestions;
            Some(())
        })
        .is_some()
    }

    // ===== Mutations optimistes (deux phases) =====

    /// Phase 1 : effet provisoire ; None si le scope a changé ou si rien n'est à faire
    pub fn apply_command<C: OptimisticCommand>(&self, token: ScopeToken, cmd: &C) -> Option<C::Undo> {
        self.mutate(|state| {
            if !token_matches(state, token, cmd.site_scoped()) {
                return None;
            }
            cmd.apply(state)
        })
    }

    /// Phase 2 (échec backend) : compensation, ignorée si le scope a changé entre-temps
    pub fn compensate<C: OptimisticCommand>(&self, token: ScopeToken, cmd: &C, undo: C::Undo) -> bool {
        self.mutate(|state| {
            if !token_matches(state, token, cmd.site_scoped()) {
                return None;
            }
            cmd.compensate(state, undo).then_some(())
        })
        .is_some()
    }
}

fn accepts(state: &StoreView, epoch: Epoch) -> bool {
    state.epoch == epoch && state.session.authenticated && state.selected_site.is_some()
}

fn token_matches(state: &StoreView, token: ScopeToken, site_scoped: bool) -> bool {
    if state.session_generation != token.session {
        return false;
    }
    !site_scoped || state.epoch == token.epoch
}
