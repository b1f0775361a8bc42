//! Relay configuration.
//!
//! Built once at startup and handed to component constructors. Required
//! values fail fast; nothing in the core reads the environment afterwards.

use std::time::Duration;

use thiserror::Error;

/// Default authorization-code lifetime: 10 minutes.
const DEFAULT_AUTH_CODE_TTL_SECS: u64 = 10 * 60;

/// Access token lifetime advertised to the platform: 6 hours.
pub const ACCESS_TOKEN_EXPIRES_IN_SECS: i64 = 60 * 60 * 6;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Immutable relay configuration shared by the token authority and handlers.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// The single OAuth client allowed to link accounts.
    pub client_id: String,
    /// Secret presented by that client on token exchange.
    pub client_secret: String,
    /// Redirect targets the authorize step accepts.
    pub redirect_uris: Vec<String>,
    /// How long an issued authorization code stays exchangeable.
    pub auth_code_ttl: Duration,
    /// Maximum age of a device-signed report-state message, if enforced.
    pub report_state_max_age: Option<Duration>,
    /// Service-account JSON for the HomeGraph notifier. `None` disables it.
    pub homegraph_credentials: Option<String>,
    /// Sign-in page the authorize step sends the user to. Served outside
    /// this API; it must post back to `/login`.
    pub login_page_url: String,
}

impl RelayConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                              | Default      |
    /// |---------------------------------------|--------------|
    /// | `CLIENT_ID`                           | required     |
    /// | `CLIENT_SECRET`                       | required     |
    /// | `REDIRECT_URIS` (comma-separated)     | required     |
    /// | `AUTH_CODE_TTL_SECS`                  | `600`        |
    /// | `REPORT_STATE_MAX_AGE_SECS`           | unset        |
    /// | `GOOGLE_APPLICATION_JSON_CREDENTIALS` | unset        |
    /// | `LOGIN_PAGE_URL`                      | required     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = get("CLIENT_ID").ok_or(ConfigError::Missing("CLIENT_ID"))?;
        let client_secret = get("CLIENT_SECRET").ok_or(ConfigError::Missing("CLIENT_SECRET"))?;

        let redirect_uris: Vec<String> = get("REDIRECT_URIS")
            .ok_or(ConfigError::Missing("REDIRECT_URIS"))?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if redirect_uris.is_empty() {
            return Err(ConfigError::Missing("REDIRECT_URIS"));
        }

        let login_page_url =
            get("LOGIN_PAGE_URL").ok_or(ConfigError::Missing("LOGIN_PAGE_URL"))?;

        let auth_code_ttl = match get("AUTH_CODE_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_secs("AUTH_CODE_TTL_SECS", &v)?),
            None => Duration::from_secs(DEFAULT_AUTH_CODE_TTL_SECS),
        };

        let report_state_max_age = get("REPORT_STATE_MAX_AGE_SECS")
            .map(|v| parse_secs("REPORT_STATE_MAX_AGE_SECS", &v).map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uris,
            auth_code_ttl,
            report_state_max_age,
            homegraph_credentials: get("GOOGLE_APPLICATION_JSON_CREDENTIALS"),
            login_page_url,
        })
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}
