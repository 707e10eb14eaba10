//! TSP API Server
//!
//! Authentication server for the passenger prediction backend.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tsp_api::auth::{Argon2Hasher, MemoryUserStore, PgUserStore, UserStore};
use tsp_api::{create_router, state::AppState};
use tsp_core::config::{AppConfig, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "tsp-api", version, about = "Passenger prediction auth server")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, env = "TSP_CONFIG")]
    config: Option<PathBuf>,

    /// Keep users in memory instead of PostgreSQL (development only)
    #[arg(long)]
    memory_store: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tsp_api={0},tsp_core={0},tower_http={0},audit={0}",
            logging.level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path.clone())?.with_env_override()?,
        None => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    let store: Arc<dyn UserStore> = if cli.memory_store {
        tracing::warn!("Using in-memory user store; accounts are lost on restart");
        Arc::new(MemoryUserStore::new())
    } else {
        let store = PgUserStore::connect(&config.database)
            .await
            .context("failed to connect to PostgreSQL")?;
        store
            .ensure_schema()
            .await
            .context("failed to prepare users table")?;
        Arc::new(store)
    };

    let hasher = Arc::new(Argon2Hasher::new(&config.auth.password)?);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let transport = config.auth.transport;
    let admin = config
        .auth
        .admin_email
        .clone()
        .zip(config.auth.admin_password.clone());

    // Create application state
    let state = Arc::new(AppState::new(config, store, hasher)?);

    if let Some((email, password)) = admin {
        let user = state
            .auth
            .ensure_admin(&email, password.expose())
            .await
            .context("failed to seed admin account")?;
        tracing::info!(user_id = user.id, email = %user.email, "Admin account ready");
    }

    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(?transport, "TSP API Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
