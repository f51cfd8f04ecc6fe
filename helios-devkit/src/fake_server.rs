/*!
Faux serveur EMS (REST + WebSocket) sur 127.0.0.1

Sert les mêmes routes que le backend réel pour exercer `HttpBackend` et
`WsTransport` de bout en bout :
- POST /api/v1/auth/token (formulaire username/password)
- GET  /api/v1/sites, /api/v1/sites/{id}/health-status, /api/v1/sites/{id}/suggestions
- POST /api/v1/sites/{id}/suggestions/{sid}/{accept|reject}
- POST /api/v1/sites/{id}/alerts/{aid}/acknowledge
- POST /api/v1/sites/{id}/rl-strategy
- GET  /ws/site/{id}?token=...  (trames poussées par `push`)
*/

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use helios_sync::models::{HealthStatus, RlStrategy, Site, Suggestion};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const FAKE_USERNAME: &str = "operator@helios.local";
pub const FAKE_PASSWORD: &str = "sunshine";
pub const FAKE_TOKEN: &str = "fake-jwt-token";

struct ServerState {
    sites: Mutex<Vec<Site>>,
    health: Mutex<HashMap<String, HealthStatus>>,
    suggestions: Mutex<HashMap<String, Vec<Suggestion>>>,
    requests: Mutex<Vec<String>>,
    pushes: broadcast::Sender<(String, String)>,
    live_clients: AtomicUsize,
    fail_mutations: AtomicBool,
}

impl ServerState {
    fn log(&self, line: String) {
        log::debug!("🌐 [FAKE] {}", line);
        self.requests.lock().push(line);
    }
}

pub struct FakeEmsServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

impl FakeEmsServer {
    pub async fn start() -> Result<Self> {
        let (pushes, _) = broadcast::channel(64);
        let state = Arc::new(ServerState {
            sites: Mutex::new(Vec::new()),
            health: Mutex::new(HashMap::new()),
            suggestions: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            pushes,
            live_clients: AtomicUsize::new(0),
            fail_mutations: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/api/v1/auth/token", post(login))
            .route("/api/v1/sites", get(sites))
            .route("/api/v1/sites/{site_id}/health-status", get(health_status))
            .route("/api/v1/sites/{site_id}/suggestions", get(suggestions))
            .route("/api/v1/sites/{site_id}/suggestions/{suggestion_id}/{action}", post(resolve_suggestion))
            .route("/api/v1/sites/{site_id}/alerts/{alert_id}/acknowledge", post(acknowledge_alert))
            .route("/api/v1/sites/{site_id}/rl-strategy", post(update_strategy))
            .route("/ws/site/{site_id}", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind fake EMS server")?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [FAKE] server stopped: {}", e);
            }
        });
        log::info!("🚀 [FAKE] EMS server listening on {}", addr);

        Ok(Self { addr, state, handle })
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn live_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn set_sites(&self, sites: Vec<Site>) {
        *self.state.sites.lock() = sites;
    }

    pub fn set_health(&self, site_id: &str, status: HealthStatus) {
        self.state.health.lock().insert(site_id.to_string(), status);
    }

    pub fn set_suggestions(&self, site_id: &str, list: Vec<Suggestion>) {
        self.state.suggestions.lock().insert(site_id.to_string(), list);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.state.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Pousse une trame à tous les clients live du site ; renvoie le nombre d'abonnés
    pub fn push(&self, site_id: &str, frame: &Value) -> usize {
        self.state
            .pushes
            .send((site_id.to_string(), frame.to_string()))
            .unwrap_or(0)
    }

    pub fn live_clients(&self) -> usize {
        self.state.live_clients.load(Ordering::SeqCst)
    }

    /// Lignes "METHOD path" reçues, dans l'ordre
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    pub async fn wait_for_live_clients(&self, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < std::time::Duration::from_millis(timeout_ms) {
            if self.live_clients() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for FakeEmsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {FAKE_TOKEN}"))
}

async fn login(State(state): State<Arc<ServerState>>, Form(form): Form<LoginForm>) -> impl IntoResponse {
    state.log(format!("POST /auth/token {}", form.username));
    if form.username == FAKE_USERNAME && form.password == FAKE_PASSWORD {
        Json(json!({"access_token": FAKE_TOKEN, "token_type": "bearer"})).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn sites(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Result<Json<Vec<Site>>, StatusCode> {
    state.log("GET /sites".into());
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(state.sites.lock().clone()))
}

async fn health_status(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HealthStatus>, StatusCode> {
    state.log(format!("GET /sites/{site_id}/health-status"));
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    state
        .health
        .lock()
        .get(&site_id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn suggestions(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Suggestion>>, StatusCode> {
    state.log(format!("GET /sites/{site_id}/suggestions"));
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(state.suggestions.lock().get(&site_id).cloned().unwrap_or_default()))
}

fn mutation_status(state: &ServerState, headers: &HeaderMap) -> Result<Json<Value>, StatusCode> {
    if !authorized(headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.fail_mutations.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({"success": true})))
}

async fn resolve_suggestion(
    State(state): State<Arc<ServerState>>,
    Path((site_id, suggestion_id, action)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    state.log(format!("POST /sites/{site_id}/suggestions/{suggestion_id}/{action}"));
    if action != "accept" && action != "reject" {
        return Err(StatusCode::NOT_FOUND);
    }
    mutation_status(&state, &headers)
}

async fn acknowledge_alert(
    State(state): State<Arc<ServerState>>,
    Path((site_id, alert_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    state.log(format!("POST /sites/{site_id}/alerts/{alert_id}/acknowledge"));
    mutation_status(&state, &headers)
}

async fn update_strategy(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
    Json(strategy): Json<RlStrategy>,
) -> Result<Json<Value>, StatusCode> {
    state.log(format!(
        "POST /sites/{site_id}/rl-strategy {}/{}/{}",
        strategy.cost_priority, strategy.grid_stability_priority, strategy.battery_longevity_priority
    ));
    mutation_status(&state, &headers)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.log(format!("GET /ws/site/{site_id}"));
    if params.get("token").map(String::as_str) != Some(FAKE_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, site_id))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>, site_id: String) {
    let mut pushes = state.pushes.subscribe();
    state.live_clients.fetch_add(1, Ordering::SeqCst);
    log::info!("🔗 [FAKE] live client connected to site {}", site_id);

    loop {
        tokio::select! {
            push = pushes.recv() => match push {
                Ok((target, text)) if target == site_id => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.live_clients.fetch_sub(1, Ordering::SeqCst);
    log::info!("🔌 [FAKE] live client left site {}", site_id);
}
