//! Device report-state message authentication.
//!
//! Devices sign their messages (HS256/384/512 JWT) with the account's
//! pre-shared secret. The unverified payload names the user only so the
//! matching secret can be looked up; nothing else in it counts until the
//! signature verifies against that secret.

use std::collections::HashSet;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::AuthError;
use crate::models::{InvalidUpdate, ReportEntry};

/// Verified report-state message.
///
/// Only the signature and the user id are checked at verification time; the
/// update list is parsed afterwards with [`DeviceReportClaims::entries`] so a
/// well-signed but malformed body is told apart from a forged one.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceReportClaims {
    pub user_id: String,
    /// Update list `[{id, cmd}]`, unparsed.
    #[serde(rename = "u", alias = "updates", default)]
    pub updates: Value,
    /// Issue time, seconds since the epoch.
    #[serde(default)]
    pub d: Option<Value>,
}

impl DeviceReportClaims {
    /// Issue time, if present and an integer.
    pub fn issued_at(&self) -> Option<i64> {
        self.d.as_ref().and_then(Value::as_i64)
    }

    /// Parse the update list. A missing list is empty.
    pub fn entries(&self) -> Result<Vec<ReportEntry>, InvalidUpdate> {
        if self.updates.is_null() {
            return Ok(Vec::new());
        }
        Vec::<ReportEntry>::deserialize(&self.updates)
            .map_err(|e| InvalidUpdate(format!("malformed update list: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ClaimedUser {
    user_id: String,
}

fn base_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

/// Read the claimed user id without checking the signature.
pub fn peek_user_id(token: &str) -> Result<String, AuthError> {
    let mut validation = base_validation();
    validation.insecure_disable_signature_validation();
    decode::<ClaimedUser>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.user_id)
        .map_err(|e| {
            debug!("device message: unreadable payload: {e}");
            AuthError::Unauthorized
        })
}

/// Verify a device message against the user's pre-shared secret.
///
/// With `max_age` set, the message must carry an issue time `d` that is
/// neither in the future nor older than `max_age` relative to `now`.
pub fn verify_device_report(
    token: &str,
    psk: &str,
    max_age: Option<Duration>,
    now: i64,
) -> Result<DeviceReportClaims, AuthError> {
    let claims = decode::<DeviceReportClaims>(
        token,
        &DecodingKey::from_secret(psk.as_bytes()),
        &base_validation(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("device message: verification failed: {e}");
        AuthError::Unauthorized
    })?;

    if let Some(max_age) = max_age {
        let issued = claims.issued_at().ok_or_else(|| {
            debug!(user_id = %claims.user_id, "device message: missing issue time");
            AuthError::Unauthorized
        })?;
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if now < issued || now > issued.saturating_add(max_age) {
            debug!(user_id = %claims.user_id, issued, now, "device message: stale or from the future");
            return Err(AuthError::Unauthorized);
        }
    }

    Ok(claims)
}
