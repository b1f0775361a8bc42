//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relayhub_core::appliances::StateError;
use relayhub_core::auth::AuthError;
use relayhub_core::fulfillment::{FulfillmentError, ReportError};
use relayhub_core::homegraph::NotifyError;
use relayhub_core::store::StoreError;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Body returned for every error except relayed upstream failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid_grant")]
    InvalidGrant,

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Update rejected: {0}")]
    UpdateRejected(String),

    #[error("Upstream returned {status}")]
    Upstream { status: u16, body: Value },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

fn body(error: &str, message: Option<&str>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: error.to_string(),
        message: message.map(str::to_string),
    })
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InvalidGrant => {
                (StatusCode::BAD_REQUEST, body("invalid_grant", None)).into_response()
            }
            AppError::UnsupportedGrantType(_) => {
                (StatusCode::BAD_REQUEST, body("unsupported_grant_type", None)).into_response()
            }
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, body("unauthorized", None)).into_response()
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, body("forbidden", None)).into_response(),
            AppError::Validation(m) => {
                (StatusCode::BAD_REQUEST, body("validation_error", Some(&m))).into_response()
            }
            AppError::UpdateRejected(_) => (
                StatusCode::BAD_REQUEST,
                body("Update failed, check device ids", None),
            )
                .into_response(),
            AppError::Upstream { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(body)).into_response()
            }
            AppError::Unavailable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, body("unavailable", Some(&m))).into_response()
            }
            AppError::Internal(m) => {
                error!("internal error: {m}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body("internal_error", Some("Internal server error")),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidGrant => AppError::InvalidGrant,
            AuthError::Unauthorized | AuthError::InvalidCredentials => AppError::Unauthorized,
            AuthError::Forbidden => AppError::Forbidden,
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<StateError> for AppError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Validation(msg) => AppError::Validation(msg),
            StateError::NotFound(msg) => {
                debug!("state update rejected: {msg}");
                AppError::UpdateRejected(msg)
            }
            StateError::Store(e) => AppError::from(e),
        }
    }
}

impl From<NotifyError> for AppError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::Upstream { status, body } => AppError::Upstream { status, body },
            NotifyError::Transport(msg) | NotifyError::Credentials(msg) => {
                warn!("graph notifier unavailable: {msg}");
                AppError::Upstream {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    body: json!({"error": "upstream_unavailable"}),
                }
            }
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::Validation(msg) => AppError::Validation(msg),
            FulfillmentError::Auth(e) => AppError::from(e),
            FulfillmentError::State(e) => AppError::from(e),
        }
    }
}

impl From<ReportError> for AppError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Auth(e) => AppError::from(e),
            ReportError::State(e) => AppError::from(e),
            ReportError::Notify(e) => AppError::from(e),
        }
    }
}
