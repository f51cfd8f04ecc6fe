use crate::error::SyncError;
use crate::models::Scope;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// Flux de trames texte d'un canal live ; se termine quand le canal tombe
pub type FrameStream = BoxStream<'static, Result<String, SyncError>>;

/// Ouvre un canal live pour un scope donné
/// Interface commune au client WebSocket réel et aux stubs du devkit
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, scope: &Scope) -> Result<FrameStream, SyncError>;
}

/// Client WebSocket : {base}/ws/site/{site_id}?token={bearer}
pub struct WsTransport {
    base_url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self, scope: &Scope) -> Result<Url, SyncError> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| SyncError::Config(format!("invalid live url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("live url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["ws", "site", scope.site_id.as_str()]);
        url.query_pairs_mut()
            .append_pair("token", scope.credential.as_str());
        Ok(url)
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn connect(&self, scope: &Scope) -> Result<FrameStream, SyncError> {
        let url = self.endpoint(scope)?;
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                SyncError::Transport(format!(
                    "live handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        debug!("[live] websocket handshake done for site {}", scope.site_id);

        // Text -> trame ; Close termine le flux ; ping/pong/binaire ignorés
        let frames = ws
            .take_while(|msg| futures::future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(SyncError::from(e))),
                }
            })
            .boxed();
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credential;

    #[test]
    fn test_endpoint_carries_site_and_token() {
        let transport = WsTransport::new("ws://127.0.0.1:8000/");
        let scope = Scope::new("site-7", &Credential::new("abc.def")).unwrap();
        let url = transport.endpoint(&scope).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/site/site-7?token=abc.def");
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_handshake() {
        // accepte le TCP mais ne répond jamais au handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let transport = WsTransport::new(format!("ws://{addr}")).with_connect_timeout(Duration::from_millis(100));
        let scope = Scope::new("1", &Credential::new("t")).unwrap();
        let started = std::time::Instant::now();
        let result = transport.connect(&scope).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        hold.abort();
    }

    #[test]
    fn test_endpoint_rejects_invalid_base() {
        let transport = WsTransport::new("not a url");
        let scope = Scope::new("1", &Credential::new("t")).unwrap();
        assert!(matches!(transport.endpoint(&scope), Err(SyncError::Config(_))));
    }
}
