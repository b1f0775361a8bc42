//! # relayhub_api
//!
//! HTTP API library for RelayHub: account linking (authorize, login, token),
//! fulfillment, device report-state, and request-sync.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use relayhub_core::appliances::DeviceStateStore;
use relayhub_core::auth::{BcryptVerifier, TokenAuthority};
use relayhub_core::fulfillment::{FulfillmentHandler, ReportStateService};
use relayhub_core::homegraph::GraphNotifier;
use relayhub_core::store::{ApplianceStore, CredentialStore};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{fulfillment, oauth, report_state, request_sync};

/// Route paths.
pub mod routes {
    pub const GET_AUTH: &str = "/auth";
    pub const POST_LOGIN: &str = "/login";
    pub const POST_TOKEN: &str = "/token";
    pub const POST_FULFILLMENT: &str = "/fulfillment";
    pub const POST_REPORT_STATE: &str = "/reportstate";
    pub const REQUEST_SYNC: &str = "/requestsync";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub authority: Arc<TokenAuthority>,
    pub fulfillment: Arc<FulfillmentHandler>,
    pub reports: Arc<ReportStateService>,
    /// HomeGraph client; `None` when no service account is configured.
    pub notifier: Option<Arc<dyn GraphNotifier>>,
}

impl AppState {
    /// Wire the core components over the given stores.
    pub fn new(
        config: ApiConfig,
        credentials: Arc<dyn CredentialStore>,
        appliances: Arc<dyn ApplianceStore>,
        notifier: Option<Arc<dyn GraphNotifier>>,
    ) -> Self {
        let authority = Arc::new(TokenAuthority::new(
            config.relay.clone(),
            credentials.clone(),
            Arc::new(BcryptVerifier),
        ));
        let devices = Arc::new(DeviceStateStore::new(appliances));
        let fulfillment = Arc::new(FulfillmentHandler::new(authority.clone(), devices.clone()));
        let reports = Arc::new(ReportStateService::new(
            credentials,
            devices,
            notifier.clone(),
            config.relay.report_state_max_age,
        ));
        Self {
            config,
            authority,
            fulfillment,
            reports,
            notifier,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `relayhub_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    relayhub_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Account linking and device-signed reports authenticate themselves.
    let public = Router::new()
        .route(routes::GET_AUTH, get(oauth::authorize_handler))
        .route(routes::POST_LOGIN, post(oauth::login_handler))
        .route(routes::POST_TOKEN, post(oauth::token_handler))
        .route(
            routes::POST_REPORT_STATE,
            post(report_state::report_state_handler),
        );

    // Bearer access token required.
    let protected = Router::new()
        .route(
            routes::POST_FULFILLMENT,
            post(fulfillment::fulfillment_handler),
        )
        .route(
            routes::REQUEST_SYNC,
            get(request_sync::request_sync_handler).post(request_sync::request_sync_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_access_token,
        ));

    let timeout = state.config.request_timeout;
    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
