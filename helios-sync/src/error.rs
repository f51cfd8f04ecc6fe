/**
 * ERREURS SYNC - Taxonomie unique des échecs de la couche de synchronisation
 *
 * RÔLE :
 * Classe chaque échec selon sa conséquence pour l'opérateur :
 * - Transport / Http : récupérable, retry + backoff, visible seulement via le statut connexion
 * - Decode : message ignoré localement, aucune erreur visible
 * - Mutation : rollback de l'effet optimiste + erreur récupérable remontée à l'appelant
 * - Unauthorized : fin de session, re-login obligatoire, jamais de retry silencieux
 */

/// Erreurs possibles de la couche de synchronisation
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status} for {context}")]
    Http { status: u16, context: String },
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("credential rejected by backend")]
    Unauthorized,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("site not in catalogue: {0}")]
    UnknownSite(String),
    #[error("{action} failed for {target}: {source}")]
    Mutation {
        action: &'static str,
        target: String,
        #[source]
        source: Box<SyncError>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    /// true si l'échec doit terminer la session (credential expiré ou invalide)
    pub fn is_auth_failure(&self) -> bool {
        match self {
            SyncError::Unauthorized => true,
            SyncError::Mutation { source, .. } => source.is_auth_failure(),
            _ => false,
        }
    }

    /// true si l'opérateur peut simplement réessayer plus tard
    pub fn is_recoverable(&self) -> bool {
        !self.is_auth_failure()
            && !matches!(self, SyncError::Config(_) | SyncError::NotAuthenticated)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => SyncError::Unauthorized,
            Some(status) => SyncError::Http {
                status: status.as_u16(),
                context: e.url().map(|u| u.path().to_string()).unwrap_or_default(),
            },
            None if e.is_decode() => SyncError::Transport(format!("invalid response body: {e}")),
            None => SyncError::Transport(e.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => SyncError::Unauthorized,
            WsError::Http(response) => SyncError::Http {
                status: response.status().as_u16(),
                context: "live channel handshake".into(),
            },
            other => SyncError::Transport(other.to_string()),
        }
    }
}
