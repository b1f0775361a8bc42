use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// RelayHub smart-home relay server.
#[derive(Parser, Debug)]
#[command(name = "relayhub_server", version, about = "RelayHub smart-home relay server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server.
    Serve(ServeArgs),

    /// Create a user account that can link with the assistant platform.
    CreateUser(CreateUserArgs),

    /// Store the device list SYNC returns for a user.
    ProvisionDevices(ProvisionDevicesArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Keep all state in memory instead of PostgreSQL. State is lost on exit.
    #[arg(long, default_value_t = false)]
    pub memory: bool,

    /// Override `BIND_ADDR`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,
}

#[derive(Args, Debug)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/relayhub"
    )]
    pub database_url: String,
}

#[derive(Args, Debug)]
pub struct CreateUserArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[arg(long)]
    pub email: String,

    #[arg(long, env = "RELAYHUB_USER_PASSWORD")]
    pub password: String,

    /// Secret devices sign report-state messages with.
    #[arg(long)]
    pub device_psk: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProvisionDevicesArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[arg(long)]
    pub user_id: String,

    /// JSON array of device descriptions, each with at least `id` and `traits`.
    #[arg(long)]
    pub file: PathBuf,
}
