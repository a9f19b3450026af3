//! Keygate licensing server.
//!
//! Validates license keys against local state and the billing provider,
//! gates generation requests behind device and quota limits, and applies
//! billing webhooks to license lifecycle state.
//!
//! Usage:
//!   keygate-server --port 8080 --db keygate.db
//!
//! Secrets come from the environment; see `Config::from_env`.

use anyhow::{Context, Result};
use clap::Parser;
use keygate_server::{AppState, ServerConfig, build_router};
use keygate_store::Store;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "keygate-server")]
#[command(about = "Keygate license validation and metering server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Path to the SQLite database (overrides KEYGATE_DB_PATH)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Keygate server starting...");

    let config = config_from_env()?;
    if config.webhook_secret.is_none() {
        warn!("KEYGATE_WEBHOOK_SECRET not set; webhook deliveries will be rejected");
    }

    let db_path = args
        .db
        .or_else(|| env::var("KEYGATE_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("keygate.db"));
    let store = Store::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!("Database: {}", db_path.display());

    let state = Arc::new(AppState::new(Arc::new(store), &config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    info!("Listening on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Reads secrets and upstream endpoints from the environment.
///
/// Required: `KEYGATE_TOKEN_SECRET`, `KEYGATE_DODO_API_KEY`.
/// `KEYGATE_DEVICE_SECRET` defaults to the token secret,
/// `KEYGATE_WEBHOOK_SECRET` is optional (unset fails closed), and the API
/// base URLs default to the hosted providers.
fn config_from_env() -> Result<ServerConfig> {
    let token_secret =
        env::var("KEYGATE_TOKEN_SECRET").context("KEYGATE_TOKEN_SECRET is required")?;
    let device_secret = env::var("KEYGATE_DEVICE_SECRET").unwrap_or_else(|_| token_secret.clone());

    Ok(ServerConfig {
        device_secret,
        webhook_secret: env::var("KEYGATE_WEBHOOK_SECRET").ok(),
        dodo_api_base: env::var("KEYGATE_DODO_API_BASE")
            .unwrap_or_else(|_| "https://live.dodopayments.com".to_string()),
        dodo_api_key: env::var("KEYGATE_DODO_API_KEY")
            .context("KEYGATE_DODO_API_KEY is required")?,
        model_api_base: env::var("KEYGATE_MODEL_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com".to_string()),
        model_api_key: env::var("KEYGATE_MODEL_API_KEY").unwrap_or_default(),
        token_secret,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
}
