//! Device-originated report-state handling.
//!
//! The device message is authenticated with the account's pre-shared secret
//! (see [`crate::auth::device`]), applied to the catalog all or nothing, and
//! relayed to the graph notifier when the account has report-state enabled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::appliances::{DeviceStateStore, StateError};
use crate::auth::AuthError;
use crate::auth::device::{peek_user_id, verify_device_report};
use crate::homegraph::{GraphNotifier, NotifyError};
use crate::models::StateUpdate;
use crate::store::CredentialStore;

/// Report-state errors.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// What happened to an accepted report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Applied to the catalog only.
    Stored,
    /// Applied and relayed; carries the notifier's response.
    Relayed(Value),
}

pub struct ReportStateService {
    credentials: Arc<dyn CredentialStore>,
    devices: Arc<DeviceStateStore>,
    notifier: Option<Arc<dyn GraphNotifier>>,
    max_age: Option<Duration>,
}

impl ReportStateService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        devices: Arc<DeviceStateStore>,
        notifier: Option<Arc<dyn GraphNotifier>>,
        max_age: Option<Duration>,
    ) -> Self {
        Self {
            credentials,
            devices,
            notifier,
            max_age,
        }
    }

    /// Handle one signed device message.
    pub async fn report(&self, token: &str) -> Result<ReportOutcome, ReportError> {
        let claimed = peek_user_id(token)?;
        let Some(info) = self
            .credentials
            .report_state_info(&claimed)
            .await
            .map_err(AuthError::from)?
        else {
            debug!(user_id = %claimed, "report-state: unknown user");
            return Err(AuthError::Unauthorized.into());
        };
        let Some(psk) = info.device_jwt_psk.as_deref().filter(|psk| !psk.is_empty()) else {
            debug!(user_id = %claimed, "report-state: account has no device secret");
            return Err(AuthError::Unauthorized.into());
        };

        let claims = verify_device_report(token, psk, self.max_age, Utc::now().timestamp())?;
        if claims.user_id != claimed {
            return Err(AuthError::Unauthorized.into());
        }
        let user_id = claims.user_id.as_str();

        let update = claims
            .entries()
            .and_then(|entries| StateUpdate::from_entries(&entries))
            .map_err(|e| StateError::Validation(e.to_string()))?;
        if !self.devices.apply_state_update(user_id, &update).await? {
            return Err(StateError::NotFound(format!(
                "update references devices not in the catalog of {user_id}"
            ))
            .into());
        }

        if !info.enabled {
            debug!(user_id, "report-state: stored, relay disabled for account");
            return Ok(ReportOutcome::Stored);
        }
        let Some(notifier) = &self.notifier else {
            warn!(user_id, "report-state: relay enabled but no graph notifier configured");
            return Ok(ReportOutcome::Stored);
        };

        let request_id = Uuid::new_v4().to_string();
        let response = notifier
            .report_state(user_id, &request_id, &update.flattened())
            .await?;
        info!(user_id, %request_id, devices = update.device_ids().count(), "state reported");
        Ok(ReportOutcome::Relayed(response))
    }
}
