//! HTTP client for the hub's discovery/command interface.
//!
//! Two endpoints matter: `GET /states` returns the full entity list, and
//! `POST /services/{domain}/{service}` issues a command. The same
//! request/response shapes apply whether the base URL points at the hub
//! directly or at a local reverse proxy that injects the bearer token; in the
//! proxied case construct the client without a token.

use crate::entity::EntityState;
use crate::error::HearthError;
use serde_json::Value;
use url::Url;

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl RestClient {
    /// `base_url` is the hub's API root, e.g. `http://hub:8123/api`.
    pub fn new(base_url: Url, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }

    /// Use a pre-built `reqwest::Client` (custom timeouts, TLS settings).
    pub fn with_client(http: reqwest::Client, base_url: Url, access_token: Option<String>) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Fetch the full entity list. Failures surface as
    /// [`HearthError::Discovery`]; callers leave their existing state in
    /// place rather than clearing it.
    pub async fn states(&self) -> Result<Vec<EntityState>, HearthError> {
        let url = self.endpoint("states");
        tracing::debug!(%url, "GET");

        let resp = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| HearthError::Discovery(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HearthError::Discovery(format!(
                "GET /states returned {status}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| HearthError::Discovery(e.to_string()))
    }

    /// Fetch one entity. `Ok(None)` when the hub has never seen the id.
    pub async fn state(&self, entity_id: &str) -> Result<Option<EntityState>, HearthError> {
        let url = self.endpoint(&format!("states/{entity_id}"));
        tracing::debug!(%url, "GET");

        let resp = self.authorized(self.http.get(&url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }

    /// Issue a command. The hub responds with the entity records it changed
    /// (possibly empty), or a non-2xx status that surfaces as
    /// [`HearthError::Command`].
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        body: &Value,
    ) -> Result<Vec<EntityState>, HearthError> {
        let url = self.endpoint(&format!("services/{domain}/{service}"));
        tracing::debug!(%url, %body, "POST");

        let resp = self
            .authorized(self.http.post(&url))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let entity_id = body
                .get("entity_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let text = resp.text().await.unwrap_or_default();
            return Err(HearthError::Command {
                entity_id,
                reason: format!("{status}: {text}"),
            });
        }
        Ok(resp.json().await?)
    }
}
