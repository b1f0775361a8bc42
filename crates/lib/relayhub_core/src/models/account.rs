//! User account models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::token::DELIMITER;

/// A user record with its credential and token bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    /// Pending authorization code, cleared once exchanged.
    pub authorization: Option<AuthorizationGrant>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_date: Option<DateTime<Utc>>,
    /// Whether state changes are relayed to the graph notifier.
    pub report_state: bool,
    /// Pre-shared secret devices sign report-state messages with.
    pub device_jwt_psk: Option<String>,
}

/// Fields needed to provision an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub device_jwt_psk: Option<String>,
}

/// A pending authorization code bound to a client and redirect target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub issued_at: DateTime<Utc>,
}

impl AuthorizationGrant {
    /// Composite `client_id$@$redirect_uri` string kept next to the code.
    pub fn domain(&self) -> String {
        format!("{}{DELIMITER}{}", self.client_id, self.redirect_uri)
    }

    /// Rebuild a grant from its stored columns.
    pub fn from_stored(code: String, domain: &str, issued_at: DateTime<Utc>) -> Option<Self> {
        let (client_id, redirect_uri) = domain.split_once(DELIMITER)?;
        Some(Self {
            code,
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            issued_at,
        })
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        self.issued_at
            .checked_add_signed(ttl)
            .is_some_and(|expires_at| now > expires_at)
    }
}

/// What report-state needs from an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStateInfo {
    pub device_jwt_psk: Option<String>,
    pub enabled: bool,
}
