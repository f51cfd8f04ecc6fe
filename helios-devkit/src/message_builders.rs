/*!
Helpers pour créer des messages de test au format du backend EMS

Enveloppes push `{type, payload}` du canal live et objets REST (sites,
santé, suggestions).
*/

use helios_sync::models::{HealthStatus, Site, Suggestion, SuggestionStatus};
use serde_json::{json, Value};

pub struct EmsMessageBuilder;

impl EmsMessageBuilder {
    /// Message telemetry_update
    pub fn telemetry(site_id: &str, pv_generation: f64, net_load: f64, battery_discharge: f64) -> Value {
        json!({
            "type": "telemetry_update",
            "payload": {
                "site_id": site_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "metrics": {
                    "pv_generation": pv_generation,
                    "net_load": net_load,
                    "battery_discharge": battery_discharge
                }
            }
        })
    }

    /// Message alert
    pub fn alert(id: &str, severity: &str, message: &str) -> Value {
        json!({
            "type": "alert",
            "payload": {
                "id": id,
                "severity": severity,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        })
    }

    /// Message rl_suggestion (toujours pending à l'émission)
    pub fn rl_suggestion(id: &str, action: &str) -> Value {
        json!({
            "type": "rl_suggestion",
            "payload": {
                "id": id,
                "status": "pending",
                "action": action,
                "expected_savings": 12.5
            }
        })
    }

    /// Message d'un type non géré par le client
    pub fn unknown(kind: &str) -> Value {
        json!({ "type": kind, "payload": {} })
    }

    pub fn site(id: &str, name: &str) -> Site {
        Site {
            id: id.to_string(),
            name: name.to_string(),
            config: Default::default(),
        }
    }

    pub fn health(site_health: f64, battery_soc: f64) -> HealthStatus {
        HealthStatus {
            site_health,
            battery_soc,
            grid_draw: 12.0,
            pv_generation_today: 340.0,
            pv_health: 98.0,
            battery_soh: 95.0,
            inverter_health: 99.0,
            ev_charger_health: 97.0,
        }
    }

    pub fn suggestion(id: &str) -> Suggestion {
        let mut strategy = serde_json::Map::new();
        strategy.insert("action".into(), json!("charge_battery"));
        Suggestion {
            id: id.to_string(),
            status: SuggestionStatus::Pending,
            strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helios_sync::dispatcher::{decode, SiteEvent};

    #[test]
    fn test_builders_decode_as_site_events() {
        let telemetry = EmsMessageBuilder::telemetry("1", 4.0, 2.0, 0.5).to_string();
        assert!(matches!(decode(&telemetry).unwrap(), Some(SiteEvent::Telemetry(_))));

        let suggestion = EmsMessageBuilder::rl_suggestion("s1", "discharge").to_string();
        match decode(&suggestion).unwrap() {
            Some(SiteEvent::Suggestion(s)) => assert_eq!(s.strategy["action"], "discharge"),
            other => panic!("unexpected {:?}", other),
        }

        let unknown = EmsMessageBuilder::unknown("weather").to_string();
        assert!(decode(&unknown).unwrap().is_none());
    }
}
