use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

pub type SiteId = String;

/// Jeton bearer opaque délivré au login
/// Le Debug est masqué pour qu'aucun log ne fuite le token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub authenticated: bool,
    pub credential: Option<Credential>,
}

/// Couple (site, credential) auquel sont liés la connexion live et le poller
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub site_id: SiteId,
    pub credential: Credential,
}

impl Scope {
    /// None si le site ou le credential est vide : c'est l'état valide "rien de sélectionné"
    pub fn new(site_id: &str, credential: &Credential) -> Option<Self> {
        if site_id.trim().is_empty() || credential.is_empty() {
            return None;
        }
        Some(Self {
            site_id: site_id.to_string(),
            credential: credential.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(deserialize_with = "string_or_number")]
    pub id: SiteId,
    pub name: String,
    /// Champs de configuration libres (localisation, capacités...)
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub site_health: f64,
    #[serde(default)]
    pub grid_draw: f64,
    #[serde(default)]
    pub battery_soc: f64,
    #[serde(default)]
    pub pv_generation_today: f64,
    #[serde(default)]
    pub pv_health: f64,
    #[serde(default)]
    pub battery_soh: f64,
    #[serde(default)]
    pub inverter_health: f64,
    #[serde(default)]
    pub ev_charger_health: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    #[serde(default)]
    pub pv_generation: f64,
    #[serde(default)]
    pub net_load: f64,
    #[serde(default)]
    pub battery_discharge: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub site_id: Option<SiteId>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metrics: TelemetryMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Le backend sérialise certains ids en entiers ; côté client tout id est une chaîne
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

fn default_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: SuggestionStatus,
    /// Payload de stratégie tel que produit par la politique RL côté backend
    #[serde(flatten)]
    pub strategy: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionAction {
    Accept,
    Reject,
}

impl SuggestionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionAction::Accept => "accept",
            SuggestionAction::Reject => "reject",
        }
    }
}

/// Poids de la stratégie RL réglés par l'opérateur (0..=100 chacun)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlStrategy {
    pub cost_priority: u8,
    pub grid_stability_priority: u8,
    pub battery_longevity_priority: u8,
}

impl Default for RlStrategy {
    fn default() -> Self {
        Self {
            cost_priority: 70,
            grid_stability_priority: 20,
            battery_longevity_priority: 10,
        }
    }
}

impl RlStrategy {
    pub fn is_valid(&self) -> bool {
        [self.cost_priority, self.grid_stability_priority, self.battery_longevity_priority]
            .iter()
            .all(|w| *w <= 100)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}
