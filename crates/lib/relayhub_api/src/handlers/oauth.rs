//! Account-linking handlers: authorize, login, and the token endpoint.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::response::Redirect;
use relayhub_core::config::ACCESS_TOKEN_EXPIRES_IN_SECS;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use url::form_urlencoded;

use crate::AppState;
use crate::error::{AppError, AppResult};

/// Query parameters the platform sends to the authorize endpoint.
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Login form posted by the sign-in page.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub grant_type: Option<String>,
}

/// Token endpoint form body. Which fields are required depends on the grant.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token_type: &'static str,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// `GET /auth`: checks client and redirect target, then sends the user to the
/// login page with the linking parameters carried along.
pub async fn authorize_handler(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> AppResult<Redirect> {
    state
        .authority
        .check_authorization_request(&params.client_id, &params.redirect_uri)?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("client_id", &params.client_id)
        .append_pair("redirect_uri", &params.redirect_uri);
    if let Some(s) = &params.state {
        query.append_pair("state", s);
    }

    let login = &state.config.relay.login_page_url;
    let separator = if login.contains('?') { '&' } else { '?' };
    Ok(Redirect::to(&format!("{login}{separator}{}", query.finish())))
}

/// `POST /login`: verifies the password, issues an authorization code, and
/// redirects back to the platform with `code` and `state`.
pub async fn login_handler(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Redirect> {
    let authority = &state.authority;
    authority.check_authorization_request(&form.client_id, &form.redirect_uri)?;

    let mut target = Url::parse(&form.redirect_uri)
        .map_err(|e| AppError::Validation(format!("redirect_uri: {e}")))?;

    let user_id = authority
        .authenticate_user(&form.username, &form.password)
        .await?;
    let code = authority
        .issue_authorization_code(&user_id, &form.client_id, &form.redirect_uri)
        .await?;

    {
        let mut pairs = target.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(s) = &form.state {
            pairs.append_pair("state", s);
        }
    }
    Ok(Redirect::to(target.as_str()))
}

fn required(field: Option<String>, name: &str) -> AppResult<String> {
    field.filter(|v| !v.is_empty()).ok_or_else(|| {
        debug!("token: missing {name}");
        AppError::InvalidGrant
    })
}

/// `POST /token`: `authorization_code` and `refresh_token` grants.
pub async fn token_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Form(form): Form<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    let grant_type = query.grant_type.or(form.grant_type).unwrap_or_default();
    let authority = &state.authority;

    match grant_type.as_str() {
        "authorization_code" => {
            let tokens = authority
                .exchange_authorization_code(
                    &required(form.code, "code")?,
                    &required(form.client_id, "client_id")?,
                    &required(form.client_secret, "client_secret")?,
                    &required(form.redirect_uri, "redirect_uri")?,
                )
                .await?;
            Ok(Json(TokenResponse {
                token_type: "Bearer",
                access_token: tokens.access_token,
                refresh_token: Some(tokens.refresh_token),
                expires_in: ACCESS_TOKEN_EXPIRES_IN_SECS,
            }))
        }
        "refresh_token" => {
            let access_token = authority
                .exchange_refresh_token(
                    &required(form.refresh_token, "refresh_token")?,
                    &required(form.client_id, "client_id")?,
                    &required(form.client_secret, "client_secret")?,
                )
                .await?;
            Ok(Json(TokenResponse {
                token_type: "Bearer",
                access_token,
                refresh_token: None,
                expires_in: ACCESS_TOKEN_EXPIRES_IN_SECS,
            }))
        }
        other => Err(AppError::UnsupportedGrantType(other.to_string())),
    }
}
