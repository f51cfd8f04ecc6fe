/**
 * ACTIONS OPTIMISTES - Mutations appliquées avant confirmation du backend
 *
 * RÔLE :
 * Donne un retour instantané à l'opérateur (suggestion retirée, alerte acquittée,
 * poids de stratégie remplacés) puis confirme auprès du backend.
 *
 * FONCTIONNEMENT (deux phases) :
 * 1. apply() sous le verrou du store -> Undo si un effet a eu lieu
 * 2. requête backend
 * 3. succès : rien de plus ; échec : compensate(Undo) puis SyncError::Mutation
 *
 * Une compensation dont le scope a changé entre-temps est jetée : elle ne doit
 * pas fuiter dans le nouveau site.
 */

use crate::api::EmsBackend;
use crate::error::SyncError;
use crate::lifecycle::SessionSignal;
use crate::models::{Alert, Credential, RlStrategy, Suggestion, SuggestionAction};
use crate::store::{ReconciledStore, ScopeToken, StoreView};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mutation réversible du store
pub trait OptimisticCommand {
    type Undo;

    fn label(&self) -> &'static str;

    /// false = survit à un changement de site (seul le changement de session l'invalide)
    fn site_scoped(&self) -> bool {
        true
    }

    /// None si rien n'a été modifié (déjà résolu, introuvable...)
    fn apply(&self, state: &mut StoreView) -> Option<Self::Undo>;

    fn compensate(&self, state: &mut StoreView, undo: Self::Undo) -> bool;
}

/// Retire une suggestion ; la compensation la réinsère telle quelle en tête
pub struct RemoveSuggestion {
    pub suggestion_id: String,
}

impl OptimisticCommand for RemoveSuggestion {
    type Undo = Suggestion;

    fn label(&self) -> &'static str {
        "resolve_suggestion"
    }

    fn apply(&self, state: &mut StoreView) -> Option<Suggestion> {
        let index = state
            .site
            .suggestions
            .iter()
            .position(|s| s.id == self.suggestion_id)?;
        Some(state.site.suggestions.remove(index))
    }

    fn compensate(&self, state: &mut StoreView, original: Suggestion) -> bool {
        if state.site.suggestions.iter().any(|s| s.id == original.id) {
            return false;
        }
        state.site.suggestions.insert(0, original);
        true
    }
}

/// Alertes d'origine et longueur de la séquence au moment de l'acquittement
#[derive(Debug, Clone, PartialEq)]
pub struct AlertUndo {
    len_at_apply: usize,
    originals: Vec<(usize, Alert)>,
}

/// Marque une alerte acquittée ; la compensation restaure l'alerte d'origine à sa place
pub struct AcknowledgeAlert {
    pub alert_id: String,
}

impl OptimisticCommand for AcknowledgeAlert {
    type Undo = AlertUndo;

    fn label(&self) -> &'static str {
        "acknowledge_alert"
    }

    fn apply(&self, state: &mut StoreView) -> Option<AlertUndo> {
        let mut originals = Vec::new();
        for (index, alert) in state.site.alerts.iter_mut().enumerate() {
            if alert.id == self.alert_id && !alert.acknowledged {
                originals.push((index, alert.clone()));
                alert.acknowledged = true;
            }
        }
        (!originals.is_empty()).then_some(AlertUndo {
            len_at_apply: state.site.alerts.len(),
            originals,
        })
    }

    fn compensate(&self, state: &mut StoreView, undo: AlertUndo) -> bool {
        // les alertes arrivent en tête : l'index d'origine est décalé d'autant
        let shift = state.site.alerts.len().saturating_sub(undo.len_at_apply);
        let mut restored = false;
        for (index, original) in undo.originals {
            let still_acked = |a: &Alert| a.id == original.id && a.acknowledged;
            let slot = match state.site.alerts.get(index + shift) {
                Some(a) if still_acked(a) => Some(index + shift),
                _ => state.site.alerts.iter().position(still_acked),
            };
            if let Some(slot) = slot {
                state.site.alerts[slot] = original;
                restored = true;
            }
        }
        restored
    }
}

/// Remplace les poids de stratégie de la session
pub struct ReplaceStrategy {
    pub strategy: RlStrategy,
}

impl OptimisticCommand for ReplaceStrategy {
    type Undo = RlStrategy;

    fn label(&self) -> &'static str {
        "update_strategy"
    }

    fn site_scoped(&self) -> bool {
        false
    }

    /// Toujours un effet : la requête part même si la valeur locale est identique
    fn apply(&self, state: &mut StoreView) -> Option<RlStrategy> {
        Some(std::mem::replace(&mut state.strategy, self.strategy))
    }

    fn compensate(&self, state: &mut StoreView, previous: RlStrategy) -> bool {
        if state.strategy != self.strategy {
            // remplacé entre-temps par une mutation plus récente
            return false;
        }
        state.strategy = previous;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    /// Aucun site sélectionné : no-op
    NoSiteSelected,
    /// Cible déjà absente (déjà résolue, ou appel concurrent sur le même id) : no-op
    AlreadyResolved,
}

#[derive(Clone)]
pub struct ActionCoordinator {
    store: ReconciledStore,
    backend: Arc<dyn EmsBackend>,
    signals: mpsc::UnboundedSender<SessionSignal>,
}

impl ActionCoordinator {
    pub fn new(
        store: ReconciledStore,
        backend: Arc<dyn EmsBackend>,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        Self { store, backend, signals }
    }

    pub async fn resolve_suggestion(&self, suggestion_id: &str, action: SuggestionAction) -> Result<Resolution, SyncError> {
        let Some((scope, token)) = self.store.current_scope() else {
            debug!("[actions] no site selected, ignoring {} of {suggestion_id}", action.as_str());
            return Ok(Resolution::NoSiteSelected);
        };
        let cmd = RemoveSuggestion {
            suggestion_id: suggestion_id.to_string(),
        };
        let Some(undo) = self.store.apply_command(token, &cmd) else {
            debug!("[actions] suggestion {suggestion_id} already resolved");
            return Ok(Resolution::AlreadyResolved);
        };

        let command_id = Uuid::new_v4();
        info!("[actions] {} suggestion {suggestion_id} (cmd {command_id})", action.as_str());
        let result = self
            .backend
            .resolve_suggestion(&scope.credential, &scope.site_id, suggestion_id, action)
            .await;
        self.settle(token, &cmd, undo, result, command_id, action.as_str(), suggestion_id, &scope.credential)
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<Resolution, SyncError> {
        let Some((scope, token)) = self.store.current_scope() else {
            return Ok(Resolution::NoSiteSelected);
        };
        let cmd = AcknowledgeAlert {
            alert_id: alert_id.to_string(),
        };
        let Some(undo) = self.store.apply_command(token, &cmd) else {
            debug!("[actions] alert {alert_id} unknown or already acknowledged");
            return Ok(Resolution::AlreadyResolved);
        };

        let command_id = Uuid::new_v4();
        info!("[actions] acknowledge alert {alert_id} (cmd {command_id})");
        let result = self
            .backend
            .acknowledge_alert(&scope.credential, &scope.site_id, alert_id)
            .await;
        self.settle(token, &cmd, undo, result, command_id, "acknowledge", alert_id, &scope.credential)
    }

    /// Les poids sont rejetés avant tout effet s'ils dépassent 100
    pub async fn update_strategy(&self, strategy: RlStrategy) -> Result<Resolution, SyncError> {
        if !strategy.is_valid() {
            return Err(SyncError::InvalidInput(format!(
                "strategy weights must be within 0..=100: {strategy:?}"
            )));
        }
        let Some((scope, token)) = self.store.current_scope() else {
            return Ok(Resolution::NoSiteSelected);
        };
        let cmd = ReplaceStrategy { strategy };
        let Some(undo) = self.store.apply_command(token, &cmd) else {
            debug!("[actions] session changed before strategy update");
            return Ok(Resolution::AlreadyResolved);
        };

        let command_id = Uuid::new_v4();
        info!("[actions] update strategy for site {} (cmd {command_id})", scope.site_id);
        let result = self
            .backend
            .update_strategy(&scope.credential, &scope.site_id, &strategy)
            .await;
        self.settle(token, &cmd, undo, result, command_id, "update_strategy", &scope.site_id, &scope.credential)
    }

    #[allow(clippy::too_many_arguments)]
    fn settle<C: OptimisticCommand>(
        &self,
        token: ScopeToken,
        cmd: &C,
        undo: C::Undo,
        result: Result<(), SyncError>,
        command_id: Uuid,
        action: &'static str,
        target: &str,
        credential: &Credential,
    ) -> Result<Resolution, SyncError> {
        let err = match result {
            Ok(()) => {
                debug!("[actions] cmd {command_id} confirmed");
                return Ok(Resolution::Confirmed);
            }
            Err(e) => e,
        };

        if self.store.compensate(token, cmd, undo) {
            warn!("[actions] {} {target} failed, rolled back (cmd {command_id}): {err}", cmd.label());
        } else {
            warn!("[actions] {} {target} failed after scope change, rollback dropped (cmd {command_id}): {err}", cmd.label());
        }
        if err.is_auth_failure() {
            let _ = self.signals.send(SessionSignal::Unauthorized {
                credential: credential.clone(),
            });
        }
        Err(SyncError::Mutation {
            action,
            target: target.to_string(),
            source: Box::new(err),
        })
    }
}
