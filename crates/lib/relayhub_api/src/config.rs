//! API server configuration.

use std::time::Duration;

use relayhub_core::config::{ConfigError, RelayConfig};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3100";
const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/relayhub";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on the time spent serving one request.
    pub request_timeout: Duration,
    /// Relay (client, redirect, token) settings shared with the core.
    pub relay: RelayConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable               | Default                              |
    /// |------------------------|--------------------------------------|
    /// | `BIND_ADDR`            | `127.0.0.1:3100`                     |
    /// | `DATABASE_URL`         | `postgres://localhost:5432/relayhub` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                                 |
    ///
    /// plus everything [`RelayConfig::from_env`] reads.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let request_timeout = match non_empty("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            database_url: non_empty("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            request_timeout: Duration::from_secs(request_timeout),
            relay: RelayConfig::from_lookup(&lookup)?,
        })
    }
}
