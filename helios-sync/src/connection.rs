/**
 * CONNECTION MANAGER - Canal live unique vers le backend EMS
 *
 * RÔLE :
 * Possède l'unique canal duplex pour exactement un scope (site, credential) à la fois.
 * Connexion, reconnexion avec backoff plafonné, fermeture, et statut observable.
 *
 * FONCTIONNEMENT :
 * - open(scope) ferme d'abord le canal précédent puis lance une tâche de connexion
 * - close() est inconditionnel et idempotent : la tâche est abortée, aucun drain
 * - Machine d'état : disconnected -> connecting -> connected -> disconnected,
 *   avec connected -> connecting sur chute du transport
 * - Chaque trame texte part dans la file entrante du dispatcher, taguée avec l'epoch
 * - Un 401/403 au handshake termine la session : pas de retry, signal au lifecycle
 *
 * GARANTIE :
 * Une génération est attribuée à chaque open ; seule la génération courante peut
 * publier un statut. Après close(), une tâche en retard ne peut donc jamais
 * republier "connecting".
 */

use crate::dispatcher::InboundFrame;
use crate::error::SyncError;
use crate::health::SyncHealthTracker;
use crate::lifecycle::SessionSignal;
use crate::models::{ConnectionStatus, Scope};
use crate::store::Epoch;
use crate::transport::LiveTransport;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backoff exponentiel plafonné entre deux tentatives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial) }
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        let next = current + current;
        if next > self.max {
            self.max
        } else {
            next
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Porte de publication du statut : seule la génération courante peut écrire
struct StatusGate {
    tx: watch::Sender<ConnectionStatus>,
    generation: Mutex<u64>,
}

impl StatusGate {
    fn publish(&self, generation: u64, status: ConnectionStatus) -> bool {
        let current = self.generation.lock();
        if *current != generation {
            return false;
        }
        set_status(&self.tx, status);
        true
    }

    /// Nouvelle génération + statut, atomiquement
    fn advance(&self, status: ConnectionStatus) -> u64 {
        let mut current = self.generation.lock();
        *current += 1;
        set_status(&self.tx, status);
        *current
    }
}

fn set_status(tx: &watch::Sender<ConnectionStatus>, status: ConnectionStatus) {
    tx.send_if_modified(|current| {
        if *current == status {
            return false;
        }
        debug!("[live] status {} -> {}", current.as_str(), status.as_str());
        *current = status;
        true
    });
}

pub struct ConnectionManager {
    transport: Arc<dyn LiveTransport>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    gate: Arc<StatusGate>,
    policy: ReconnectPolicy,
    health: SyncHealthTracker,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        frames: mpsc::UnboundedSender<InboundFrame>,
        signals: mpsc::UnboundedSender<SessionSignal>,
        policy: ReconnectPolicy,
        health: SyncHealthTracker,
    ) -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            transport,
            frames,
            signals,
            gate: Arc::new(StatusGate {
                tx,
                generation: Mutex::new(0),
            }),
            policy,
            health,
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.gate.tx.borrow()
    }

    /// Récepteur en lecture seule pour le store et la présentation
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.gate.tx.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ouvre le canal pour `scope` ; ferme d'abord tout canal existant
    pub fn open(&self, scope: Scope, epoch: Epoch) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let generation = self.gate.advance(ConnectionStatus::Connecting);
        info!("[live] opening channel for site {}", scope.site_id);

        let worker = LiveWorker {
            transport: self.transport.clone(),
            frames: self.frames.clone(),
            signals: self.signals.clone(),
            gate: self.gate.clone(),
            policy: self.policy,
            health: self.health.clone(),
            generation,
            epoch,
            scope,
        };
        *task = Some(tokio::spawn(worker.run()));
    }

    /// Fermeture inconditionnelle ; sans effet si déjà fermé
    pub fn close(&self) {
        let mut task = self.task.lock();
        let had_task = task.is_some();
        if let Some(running) = task.take() {
            running.abort();
        }
        self.gate.advance(ConnectionStatus::Disconnected);
        if had_task {
            info!("[live] channel closed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.abort();
        }
    }
}

/// Tâche de connexion d'une génération donnée
struct LiveWorker {
    transport: Arc<dyn LiveTransport>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    gate: Arc<StatusGate>,
    policy: ReconnectPolicy,
    health: SyncHealthTracker,
    generation: u64,
    epoch: Epoch,
    scope: Scope,
}

impl LiveWorker {
    async fn run(self) {
        let mut backoff = self.policy.initial;
        loop {
            if !self.gate.publish(self.generation, ConnectionStatus::Connecting) {
                return;
            }
            match self.transport.connect(&self.scope).await {
                Ok(mut stream) => {
                    if !self.gate.publish(self.generation, ConnectionStatus::Connected) {
                        return;
                    }
                    info!("[live] connected to site {}", self.scope.site_id);
                    backoff = self.policy.initial;

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(text) => {
                                let frame = InboundFrame { epoch: self.epoch, text };
                                if self.frames.send(frame).is_err() {
                                    debug!("[live] inbound queue closed, stopping");
                                    self.gate.publish(self.generation, ConnectionStatus::Disconnected);
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("[live] channel error: {e}");
                                break;
                            }
                        }
                    }
                    warn!("[live] channel to site {} dropped, reconnecting", self.scope.site_id);
                    self.health.increment_reconnects();
                }
                Err(SyncError::Unauthorized) => {
                    warn!("[live] credential rejected for site {}", self.scope.site_id);
                    self.gate.publish(self.generation, ConnectionStatus::Disconnected);
                    let _ = self.signals.send(SessionSignal::Unauthorized {
                        credential: self.scope.credential.clone(),
                    });
                    return;
                }
                Err(e) => {
                    warn!("[live] connect to site {} failed: {e}", self.scope.site_id);
                }
            }

            if !self.gate.publish(self.generation, ConnectionStatus::Connecting) {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = self.policy.next_backoff(backoff);
        }
    }
}
