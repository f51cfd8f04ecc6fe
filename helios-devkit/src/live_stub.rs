/*!
Mock du canal live pour développement sans serveur WebSocket

Implémente `LiveTransport` : chaque connexion ouverte par le ConnectionManager
devient un flux alimenté depuis le test (trames JSON, texte brut invalide,
coupure du transport). On peut aussi refuser les connexions ou rejeter le
credential au handshake.
*/

use async_trait::async_trait;
use futures::StreamExt;
use helios_sync::models::Scope;
use helios_sync::transport::{FrameStream, LiveTransport};
use helios_sync::SyncError;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type FrameSender = mpsc::UnboundedSender<Result<String, SyncError>>;

struct LiveConnection {
    site_id: String,
    sender: FrameSender,
}

#[derive(Default)]
struct LiveState {
    attempts: Vec<String>,
    current: Option<LiveConnection>,
    refuse: bool,
    unauthorized: bool,
}

#[derive(Clone, Default)]
pub struct MockLiveTransport {
    state: Arc<Mutex<LiveState>>,
}

impl MockLiveTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les prochaines tentatives échouent au niveau transport (retry attendu)
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Les prochaines tentatives échouent avec un 401 au handshake
    pub fn reject_credentials(&self, reject: bool) {
        self.state.lock().unauthorized = reject;
    }

    /// Sites demandés à chaque tentative, dans l'ordre
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().attempts.clone()
    }

    /// Site de la connexion encore ouverte côté client
    pub fn active_site(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .filter(|c| !c.sender.is_closed())
            .map(|c| c.site_id.clone())
    }

    /// Envoie une trame JSON sur la connexion courante ; false si aucune n'est ouverte
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_raw(&value.to_string())
    }

    pub fn send_raw(&self, text: &str) -> bool {
        let state = self.state.lock();
        match state.current.as_ref() {
            Some(conn) => {
                let sent = conn.sender.send(Ok(text.to_string())).is_ok();
                if sent {
                    log::info!("📨 [MOCK] pushed frame to site {}", conn.site_id);
                }
                sent
            }
            None => false,
        }
    }

    /// Coupe la connexion courante comme une chute réseau
    pub fn drop_connection(&self) {
        if let Some(conn) = self.state.lock().current.take() {
            log::info!("🔌 [MOCK] dropping live connection to site {}", conn.site_id);
        }
    }

    /// Attend qu'au moins `count` tentatives de connexion aient eu lieu
    pub async fn wait_for_attempts(&self, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.state.lock().attempts.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Attend une connexion ouverte sur `site_id`
    pub async fn wait_for_site(&self, site_id: &str, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.active_site().as_deref() == Some(site_id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl LiveTransport for MockLiveTransport {
    async fn connect(&self, scope: &Scope) -> Result<FrameStream, SyncError> {
        let mut state = self.state.lock();
        state.attempts.push(scope.site_id.clone());
        if state.unauthorized {
            return Err(SyncError::Unauthorized);
        }
        if state.refuse {
            return Err(SyncError::Transport("connection refused".into()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.current = Some(LiveConnection {
            site_id: scope.site_id.clone(),
            sender,
        });
        log::info!("🔗 [MOCK] live connection opened for site {}", scope.site_id);

        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(stream.boxed())
    }
}
