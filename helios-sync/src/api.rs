/**
 * API EMS - Endpoints requête/réponse du backend
 *
 * RÔLE :
 * Interface EmsBackend (login, catalogue, santé, suggestions, mutations) et son
 * implémentation HTTP. Le poller, le coordinateur d'actions et le lifecycle ne
 * connaissent que le trait : les tests branchent le MockBackend du devkit.
 *
 * FONCTIONNEMENT :
 * - Bearer auth sur tout sauf /auth/token (formulaire username/password)
 * - 401/403 -> SyncError::Unauthorized (fin de session), autres statuts -> Http
 * - Timeout par requête issu de la config
 */

use crate::config::ApiConf;
use crate::error::SyncError;
use crate::models::{Credential, HealthStatus, RlStrategy, Site, Suggestion, SuggestionAction};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

#[async_trait]
pub trait EmsBackend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Credential, SyncError>;
    async fn fetch_sites(&self, credential: &Credential) -> Result<Vec<Site>, SyncError>;
    async fn fetch_health_status(&self, credential: &Credential, site_id: &str) -> Result<HealthStatus, SyncError>;
    async fn fetch_suggestions(&self, credential: &Credential, site_id: &str) -> Result<Vec<Suggestion>, SyncError>;
    async fn resolve_suggestion(
        &self,
        credential: &Credential,
        site_id: &str,
        suggestion_id: &str,
        action: SuggestionAction,
    ) -> Result<(), SyncError>;
    async fn acknowledge_alert(&self, credential: &Credential, site_id: &str, alert_id: &str) -> Result<(), SyncError>;
    async fn update_strategy(&self, credential: &Credential, site_id: &str, strategy: &RlStrategy) -> Result<(), SyncError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(conf: &ApiConf) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(conf.request_timeout_ms))
            .user_agent(concat!("helios-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: conf.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, credential: &Credential) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("[api] {} {}", method, path);
        self.client.request(method, url).bearer_auth(credential.as_str())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, credential: &Credential) -> Result<T, SyncError> {
        let response = self
            .request(Method::GET, path, credential)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post(&self, builder: RequestBuilder) -> Result<(), SyncError> {
        builder.send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl EmsBackend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<Credential, SyncError> {
        let response = self
            .client
            .post(format!("{}/auth/token", self.base_url))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;
        let credential = Credential::new(token.access_token);
        if credential.is_empty() {
            return Err(SyncError::Unauthorized);
        }
        Ok(credential)
    }

    async fn fetch_sites(&self, credential: &Credential) -> Result<Vec<Site>, SyncError> {
        self.get_json("/sites", credential).await
    }

    async fn fetch_health_status(&self, credential: &Credential, site_id: &str) -> Result<HealthStatus, SyncError> {
        self.get_json(&format!("/sites/{site_id}/health-status"), credential).await
    }

    async fn fetch_suggestions(&self, credential: &Credential, site_id: &str) -> Result<Vec<Suggestion>, SyncError> {
        self.get_json(&format!("/sites/{site_id}/suggestions"), credential).await
    }

    async fn resolve_suggestion(
        &self,
        credential: &Credential,
        site_id: &str,
        suggestion_id: &str,
        action: SuggestionAction,
    ) -> Result<(), SyncError> {
        let path = format!("/sites/{site_id}/suggestions/{suggestion_id}/{}", action.as_str());
        self.post(self.request(Method::POST, &path, credential)).await
    }

    async fn acknowledge_alert(&self, credential: &Credential, site_id: &str, alert_id: &str) -> Result<(), SyncError> {
        let path = format!("/sites/{site_id}/alerts/{alert_id}/acknowledge");
        self.post(self.request(Method::POST, &path, credential)).await
    }

    async fn update_strategy(&self, credential: &Credential, site_id: &str, strategy: &RlStrategy) -> Result<(), SyncError> {
        let path = format!("/sites/{site_id}/rl-strategy");
        self.post(self.request(Method::POST, &path, credential).json(strategy)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let conf = ApiConf {
            base_url: "http://127.0.0.1:8000/api/v1/".into(),
            request_timeout_ms: 1000,
        };
        let backend = HttpBackend::new(&conf).unwrap();
        assert_eq!(backend.base_url(), "http://127.0.0.1:8000/api/v1");
    }
}
