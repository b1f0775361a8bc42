//! Device report-state endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relayhub_core::fulfillment::ReportOutcome;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::bearer_token;

/// `POST /reportstate`: the bearer credential is the device-signed message
/// itself, not an access token.
pub async fn report_state_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let token = bearer_token(&headers)?;
    match state.reports.report(token).await? {
        ReportOutcome::Stored => Ok(StatusCode::OK.into_response()),
        ReportOutcome::Relayed(body) => Ok(Json(body).into_response()),
    }
}
