//! Graph notifier: pushes state changes and sync requests to Google HomeGraph.
//!
//! Authenticates as a service account: an RS256-signed assertion is exchanged
//! for an OAuth access token, which is cached until shortly before it
//! expires. Calls are not retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::FlatStates;

/// OAuth scope for HomeGraph.
pub const HOMEGRAPH_SCOPE: &str = "https://www.googleapis.com/auth/homegraph";

const HOMEGRAPH_BASE_URL: &str = "https://homegraph.googleapis.com/v1";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime accepted by Google's token endpoint (max one hour).
const ASSERTION_LIFETIME_SECS: i64 = 60 * 60;

/// Refresh the cached access token this long before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Notifier errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Upstream returned {status}")]
    Upstream { status: u16, body: Value },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Credentials error: {0}")]
    Credentials(String),
}

/// External service that propagates state changes to the assistant cloud.
#[async_trait]
pub trait GraphNotifier: Send + Sync {
    /// Report new device states for an agent user.
    async fn report_state(
        &self,
        agent_user_id: &str,
        request_id: &str,
        states: &FlatStates,
    ) -> Result<Value, NotifyError>;

    /// Ask the platform to issue a fresh SYNC for an agent user.
    async fn request_sync(&self, agent_user_id: &str) -> Result<Value, NotifyError>;
}

/// Fields of a Google service-account key file that are used here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, NotifyError> {
        serde_json::from_str(json)
            .map_err(|e| NotifyError::Credentials(format!("service account json: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Request body for `devices:reportStateAndNotification`.
pub fn report_state_body(agent_user_id: &str, request_id: &str, states: &FlatStates) -> Value {
    json!({
        "agentUserId": agent_user_id,
        "requestId": request_id,
        "payload": {
            "devices": {
                "states": states,
            },
        },
    })
}

/// Request body for `devices:requestSync`.
pub fn request_sync_body(agent_user_id: &str) -> Value {
    json!({ "agentUserId": agent_user_id })
}

/// HomeGraph REST client.
pub struct HomeGraphClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl HomeGraphClient {
    pub fn new(key: ServiceAccountKey) -> Result<Self, NotifyError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| NotifyError::Credentials(format!("private key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            key,
            signing_key,
            base_url: HOMEGRAPH_BASE_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Build from the raw service-account JSON.
    pub fn from_credentials_json(json: &str) -> Result<Self, NotifyError> {
        Self::new(ServiceAccountKey::from_json(json)?)
    }

    /// Point at a different HomeGraph endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, NotifyError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref()
            && token.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
        {
            return Ok(token.value.clone());
        }

        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: HOMEGRAPH_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| NotifyError::Credentials(format!("sign assertion: {e}")))?;

        let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("token exchange: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = read_body(resp).await;
            warn!(status = status.as_u16(), "service account token exchange failed");
            return Err(NotifyError::Credentials(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let token: TokenEndpointResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError::Credentials(format!("token response: {e}")))?;

        debug!(expires_in = token.expires_in, "homegraph access token refreshed");
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        });
        Ok(value)
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value, NotifyError> {
        let token = self.access_token().await?;
        let url = format!("{}/devices:{method}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("{method}: {e}")))?;

        let status = resp.status();
        let body = read_body(resp).await;
        if !status.is_success() {
            warn!(method, status = status.as_u16(), "homegraph call failed");
            // Relay Google's error object rather than the envelope around it.
            let body = body.get("error").cloned().unwrap_or(body);
            return Err(NotifyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

async fn read_body(resp: reqwest::Response) -> Value {
    match resp.bytes().await {
        Ok(bytes) if bytes.is_empty() => json!({}),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) => Value::String(e.to_string()),
    }
}

#[async_trait]
impl GraphNotifier for HomeGraphClient {
    async fn report_state(
        &self,
        agent_user_id: &str,
        request_id: &str,
        states: &FlatStates,
    ) -> Result<Value, NotifyError> {
        self.post(
            "reportStateAndNotification",
            &report_state_body(agent_user_id, request_id, states),
        )
        .await
    }

    async fn request_sync(&self, agent_user_id: &str) -> Result<Value, NotifyError> {
        self.post("requestSync", &request_sync_body(agent_user_id)).await
    }
}
