/**
 * EVENT DISPATCHER - Décodage et routage des messages push du canal live
 *
 * RÔLE :
 * Consomme la file unique des trames entrantes, décode chaque message
 * `{type, payload}` et l'applique à la tranche du store concernée.
 *
 * FONCTIONNEMENT :
 * - telemetry_update -> remplace la télémétrie en entier
 * - alert            -> alerte ajoutée en tête
 * - rl_suggestion    -> suggestion (pending) ajoutée en tête
 * - type inconnu     -> ignoré
 * - JSON invalide    -> loggé puis jeté, aucune mutation, jamais propagé
 *
 * Ordre d'application = ordre d'arrivée ; aucun batching.
 */

use crate::error::SyncError;
use crate::health::SyncHealthTracker;
use crate::models::{Alert, Suggestion, Telemetry};
use crate::store::{Epoch, ReconciledStore};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Trame brute reçue du canal live, taguée avec l'epoch du scope qui l'a ouverte
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub epoch: Epoch,
    pub text: String,
}

/// Message push décodé
#[derive(Debug, Clone, PartialEq)]
pub enum SiteEvent {
    Telemetry(Telemetry),
    Alert(Alert),
    Suggestion(Suggestion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Scope changé depuis la réception
    Stale,
    /// Type de message non reconnu
    Ignored(String),
    Malformed,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Décode un message brut ; Ok(None) pour un type non reconnu
pub fn decode(raw: &str) -> Result<Option<SiteEvent>, SyncError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    let event = match envelope.kind.as_str() {
        "telemetry_update" => SiteEvent::Telemetry(serde_json::from_value(envelope.payload)?),
        "alert" => SiteEvent::Alert(serde_json::from_value(envelope.payload)?),
        "rl_suggestion" => SiteEvent::Suggestion(serde_json::from_value(envelope.payload)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[derive(Clone)]
pub struct EventDispatcher {
    store: ReconciledStore,
    health: SyncHealthTracker,
}

impl EventDispatcher {
    pub fn new(store: ReconciledStore, health: SyncHealthTracker) -> Self {
        Self { store, health }
    }

    pub fn dispatch(&self, frame: &InboundFrame) -> DispatchOutcome {
        let event = match decode(&frame.text) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("[dispatch] ignoring unrecognized message");
                return DispatchOutcome::Ignored(message_kind(&frame.text));
            }
            Err(e) => {
                warn!("[dispatch] dropping malformed message: {e}");
                self.health.frame_dropped();
                return DispatchOutcome::Malformed;
            }
        };

        if self.store.apply_event(frame.epoch, event) {
            self.health.frame_applied();
            DispatchOutcome::Applied
        } else {
            debug!("[dispatch] discarding frame from stale epoch {}", frame.epoch);
            self.health.frame_stale();
            DispatchOutcome::Stale
        }
    }

    /// Boucle consommatrice de la file entrante ; se termine quand tous les producteurs sont fermés
    pub async fn run(self, mut frames: mpsc::UnboundedReceiver<InboundFrame>) {
        while let Some(frame) = frames.recv().await {
            self.dispatch(&frame);
        }
        debug!("[dispatch] inbound queue closed");
    }
}

fn message_kind(raw: &str) -> String {
    serde_json::from_str::<Envelope>(raw)
        .map(|e| e.kind)
        .unwrap_or_default()
}
