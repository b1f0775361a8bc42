//! Request-sync endpoint.

use axum::Json;
use axum::extract::{Extension, State};
use relayhub_core::auth::Authenticated;
use serde_json::Value;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};

/// `GET|POST /requestsync`: asks the platform to re-run SYNC for the caller.
pub async fn request_sync_handler(
    State(state): State<AppState>,
    Extension(user): Extension<Authenticated>,
) -> AppResult<Json<Value>> {
    let notifier = state
        .notifier
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("graph notifier not configured".into()))?;
    let resp = notifier.request_sync(user.user_id()).await?;
    info!(user_id = user.user_id(), "sync requested");
    Ok(Json(resp))
}
