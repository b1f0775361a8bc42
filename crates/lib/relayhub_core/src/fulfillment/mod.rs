//! Fulfillment protocol handler.
//!
//! Dispatches assistant-platform intents onto the token authority and the
//! device state store. Callers must hold an [`Authenticated`] proof, so no
//! intent can touch state before the bearer gate has passed.

pub mod report_state;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::appliances::{DeviceStateStore, StateError};
use crate::auth::{AuthError, Authenticated, TokenAuthority};

pub use report_state::{ReportError, ReportOutcome, ReportStateService};

pub const INTENT_SYNC: &str = "action.devices.SYNC";
pub const INTENT_QUERY: &str = "action.devices.QUERY";
pub const INTENT_EXECUTE: &str = "action.devices.EXECUTE";
pub const INTENT_DISCONNECT: &str = "action.devices.DISCONNECT";

/// Fulfillment errors.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Inbound fulfillment request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    pub request_id: String,
    pub inputs: Vec<FulfillmentInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillmentInput {
    pub intent: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct DeviceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    devices: Vec<DeviceRef>,
}

#[derive(Debug, Deserialize)]
struct ExecuteCommand {
    devices: Vec<DeviceRef>,
}

#[derive(Debug, Deserialize)]
struct ExecutePayload {
    commands: Vec<ExecuteCommand>,
}

/// Intent dispatcher.
pub struct FulfillmentHandler {
    authority: Arc<TokenAuthority>,
    devices: Arc<DeviceStateStore>,
}

impl FulfillmentHandler {
    pub fn new(authority: Arc<TokenAuthority>, devices: Arc<DeviceStateStore>) -> Self {
        Self { authority, devices }
    }

    /// Answer one fulfillment request for the authenticated user.
    pub async fn handle(
        &self,
        user: &Authenticated,
        request: FulfillmentRequest,
    ) -> Result<Value, FulfillmentError> {
        let Some(input) = request.inputs.into_iter().next() else {
            return Err(FulfillmentError::Validation("request has no inputs".into()));
        };
        debug!(user_id = user.user_id(), intent = %input.intent, "fulfillment");

        match input.intent.as_str() {
            INTENT_SYNC => self.on_sync(user, &request.request_id).await,
            INTENT_QUERY => {
                let payload: QueryPayload = parse_payload(input.payload)?;
                self.on_query(user, &request.request_id, payload).await
            }
            INTENT_EXECUTE => {
                let payload: ExecutePayload = parse_payload(input.payload)?;
                Ok(on_execute(&request.request_id, payload))
            }
            INTENT_DISCONNECT => self.on_disconnect(user).await,
            other => Err(FulfillmentError::Validation(format!(
                "unsupported intent '{other}'"
            ))),
        }
    }

    async fn on_sync(&self, user: &Authenticated, request_id: &str) -> Result<Value, FulfillmentError> {
        let user_id = user.user_id();
        let devices = self.devices.provisioned_devices(user_id).await?;
        self.devices.sync(user_id, &devices).await?;
        Ok(json!({
            "requestId": request_id,
            "payload": {
                "agentUserId": user_id,
                "devices": devices,
            },
        }))
    }

    async fn on_query(
        &self,
        user: &Authenticated,
        request_id: &str,
        payload: QueryPayload,
    ) -> Result<Value, FulfillmentError> {
        let ids: Vec<String> = payload.devices.into_iter().map(|d| d.id).collect();
        let states = self.devices.query(user.user_id(), &ids).await?;

        let mut devices = Map::new();
        for id in ids {
            let state = match states.get(&id) {
                Some(state) => Value::Object(state.clone()),
                None => {
                    debug!(user_id = user.user_id(), device_id = %id, "query: device not in catalog");
                    device_not_found()
                }
            };
            devices.insert(id, state);
        }
        Ok(json!({
            "requestId": request_id,
            "payload": { "devices": devices },
        }))
    }

    async fn on_disconnect(&self, user: &Authenticated) -> Result<Value, FulfillmentError> {
        let user_id = user.user_id();
        self.authority.revoke(user_id).await?;
        self.devices.delete_catalog(user_id).await?;
        info!(user_id, "account unlinked");
        Ok(json!({}))
    }
}

fn on_execute(request_id: &str, payload: ExecutePayload) -> Value {
    let commands: Vec<Value> = payload
        .commands
        .into_iter()
        .map(|command| {
            let ids: Vec<String> = command.devices.into_iter().map(|d| d.id).collect();
            json!({
                "ids": ids,
                "status": "ERROR",
                "errorCode": "actionNotAvailable",
                "debugString": "Ensure devices are locally identified.",
            })
        })
        .collect();
    json!({
        "requestId": request_id,
        "payload": { "commands": commands },
    })
}

fn device_not_found() -> Value {
    json!({
        "online": false,
        "status": "ERROR",
        "errorCode": "deviceNotFound",
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, FulfillmentError> {
    serde_json::from_value(payload)
        .map_err(|e| FulfillmentError::Validation(format!("malformed payload: {e}")))
}
