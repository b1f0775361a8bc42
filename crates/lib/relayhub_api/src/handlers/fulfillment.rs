//! Fulfillment endpoint.

use axum::Json;
use axum::extract::{Extension, State};
use relayhub_core::auth::Authenticated;
use relayhub_core::fulfillment::FulfillmentRequest;
use serde_json::Value;

use crate::AppState;
use crate::error::{AppError, AppResult};

/// `POST /fulfillment`: SYNC, QUERY, EXECUTE and DISCONNECT intents.
pub async fn fulfillment_handler(
    State(state): State<AppState>,
    Extension(user): Extension<Authenticated>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let request: FulfillmentRequest = serde_json::from_value(body)
        .map_err(|e| AppError::Validation(format!("malformed fulfillment request: {e}")))?;
    let resp = state.fulfillment.handle(&user, request).await?;
    Ok(Json(resp))
}
