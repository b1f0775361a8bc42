//! RelayHub server binary.
//!
//! `serve` runs the HTTP API; `create-user` and `provision-devices` fill the
//! account and device tables for local use.

pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, CreateUserArgs, ProvisionDevicesArgs, ServeArgs};
use relayhub_api::config::ApiConfig;
use relayhub_core::appliances::DeviceStateStore;
use relayhub_core::auth::password::hash_password;
use relayhub_core::homegraph::{GraphNotifier, HomeGraphClient};
use relayhub_core::models::{NewAccount, ProvisionedDevice};
use relayhub_core::store::{CredentialStore, MemoryStore, PgStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

mod cli;

const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,relayhub_api=debug,relayhub_core=debug")
            }),
        )
        .init();

    let args = Cli::parse();

    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Serve(args) => serve(args).await,
        Commands::CreateUser(args) => create_user(args).await,
        Commands::ProvisionDevices(args) => provision_devices(args).await,
    }
}

async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    info!("running database migrations");
    relayhub_api::migrate(&pool).await?;
    Ok(pool)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let notifier: Option<Arc<dyn GraphNotifier>> = match &config.relay.homegraph_credentials {
        Some(json) => Some(Arc::new(HomeGraphClient::from_credentials_json(json)?)),
        None => {
            warn!("GOOGLE_APPLICATION_JSON_CREDENTIALS not set: report-state relay and request-sync are disabled");
            None
        }
    };

    let state = if args.memory {
        warn!("using in-memory store: all state is lost on exit");
        let store = Arc::new(MemoryStore::new());
        relayhub_api::AppState::new(config.clone(), store.clone(), store, notifier)
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = connect(&config.database_url, args.max_connections).await?;
        let store = Arc::new(PgStore::new(pool));
        relayhub_api::AppState::new(config.clone(), store.clone(), store, notifier)
    };

    let app = relayhub_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "RelayHub API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

async fn create_user(args: CreateUserArgs) -> Result<()> {
    if !args.email.contains('@') {
        return Err(Error::Custom(format!("not an email address: {}", args.email)));
    }
    if args.device_psk.as_deref().is_some_and(|psk| psk.trim().is_empty()) {
        return Err(Error::Custom("device secret must not be empty".into()));
    }
    let password_hash = hash_password(&args.password)?;

    let pool = connect(&args.db.database_url, 1).await?;
    let store = PgStore::new(pool);
    let user_id = store
        .create_account(NewAccount {
            email: args.email.clone(),
            password_hash,
            device_jwt_psk: args.device_psk,
        })
        .await?;

    info!(%user_id, email = %args.email, "user created");
    println!("{user_id}");
    Ok(())
}

async fn provision_devices(args: ProvisionDevicesArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.file).await?;
    let devices: Vec<ProvisionedDevice> = serde_json::from_str(&raw)?;

    let pool = connect(&args.db.database_url, 1).await?;
    let states = DeviceStateStore::new(Arc::new(PgStore::new(pool)));
    states.provision(&args.user_id, &devices).await?;

    info!(user_id = %args.user_id, devices = devices.len(), "devices provisioned");
    Ok(())
}
