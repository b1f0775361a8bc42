//! Authentication middleware: bearer access-token extraction and validation.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Extract the credential from `Authorization: Bearer <token>`. The scheme is
/// matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            debug!("missing authorization header");
            AppError::Unauthorized
        })?;

    let (scheme, token) = header.split_once(' ').ok_or(AppError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        debug!("unsupported authorization scheme");
        return Err(AppError::Unauthorized);
    }
    Ok(token.trim())
}

/// Axum middleware: checks the bearer token against the stored access token
/// and injects the resulting `Authenticated` into request extensions.
pub async fn require_access_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?;
    let user = state.authority.authenticate_bearer(token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
