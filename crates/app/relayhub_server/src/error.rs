use relayhub_core::appliances::StateError;
use relayhub_core::auth::AuthError;
use relayhub_core::config::ConfigError;
use relayhub_core::homegraph::NotifyError;
use relayhub_core::store::StoreError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("Config: {}", .0)]
    Config(#[from] ConfigError),

    #[error("IO: {}", .0)]
    Io(#[from] std::io::Error),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error("Database: {}", .0)]
    Db(#[from] sqlx::Error),

    #[error("Migration: {}", .0)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Store: {}", .0)]
    Store(#[from] StoreError),

    #[error("Auth: {}", .0)]
    Auth(#[from] AuthError),

    #[error("Devices: {}", .0)]
    State(#[from] StateError),

    #[error("Graph notifier: {}", .0)]
    Notify(#[from] NotifyError),
}
