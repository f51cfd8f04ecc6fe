/**
 * SNAPSHOT POLLER - Pull périodique du HealthStatus du site sélectionné
 *
 * RÔLE :
 * Rafraîchit la santé du site à intervalle fixe (60s par défaut) et la remplace
 * en entier dans le store.
 *
 * FONCTIONNEMENT :
 * - start(scope) : premier pull immédiat, puis un par intervalle
 * - échec réseau/HTTP : snapshot précédent conservé, warn + compteur, jamais fatal
 * - 401/403 : arrêt du poller et signal de fin de session
 * - stop() : idempotent ; un résultat arrivant après un changement de scope porte
 *   un epoch périmé et est jeté par le store
 */

use crate::api::EmsBackend;
use crate::error::SyncError;
use crate::health::SyncHealthTracker;
use crate::lifecycle::SessionSignal;
use crate::models::Scope;
use crate::store::{Epoch, ReconciledStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct SnapshotPoller {
    backend: Arc<dyn EmsBackend>,
    store: ReconciledStore,
    signals: mpsc::UnboundedSender<SessionSignal>,
    health: SyncHealthTracker,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotPoller {
    pub fn new(
        backend: Arc<dyn EmsBackend>,
        store: ReconciledStore,
        signals: mpsc::UnboundedSender<SessionSignal>,
        health: SyncHealthTracker,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            signals,
            health,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Démarre les pulls pour `scope` ; remplace un poller déjà actif
    pub fn start(&self, scope: Scope, epoch: Epoch) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        info!(
            "[poller] polling health of site {} every {}s",
            scope.site_id,
            self.interval.as_secs_f32()
        );

        let backend = self.backend.clone();
        let store = self.store.clone();
        let signals = self.signals.clone();
        let health = self.health.clone();
        let period = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // le premier tick est immédiat
                ticker.tick().await;
                match backend.fetch_health_status(&scope.credential, &scope.site_id).await {
                    Ok(status) => {
                        if store.set_health_status(epoch, status) {
                            health.poll_succeeded();
                        } else {
                            debug!("[poller] snapshot for site {} arrived after scope change", scope.site_id);
                            return;
                        }
                    }
                    Err(SyncError::Unauthorized) => {
                        warn!("[poller] credential rejected while polling site {}", scope.site_id);
                        health.poll_failed();
                        let _ = signals.send(SessionSignal::Unauthorized {
                            credential: scope.credential.clone(),
                        });
                        return;
                    }
                    Err(e) => {
                        warn!("[poller] health pull for site {} failed, keeping previous snapshot: {e}", scope.site_id);
                        health.poll_failed();
                    }
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(running) = self.task.lock().take() {
            running.abort();
            debug!("[poller] stopped");
        }
    }
}

impl Drop for SnapshotPoller {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.abort();
        }
    }
}
