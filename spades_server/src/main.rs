//! Spades match server.
//!
//! Serves the match and matchmaking API over HTTP and WebSocket, backed by
//! Postgres or, with `--in-memory`, by process-local stores.

use std::net::SocketAddr;

use anyhow::{Context, Error};
use ctrlc::set_handler;
use log::{error, info, warn};
use pico_args::Arguments;
use tokio::sync::mpsc::UnboundedReceiver;
use spades_engine::db::Database;
use spades_server::api::{self, AppState};
use spades_server::config::{Backend, ServerConfig};
use spades_server::{logging, metrics};

const HELP: &str = "\
Run a Spades match server

USAGE:
  spades_server [OPTIONS]

OPTIONS:
  --bind          IP:PORT  Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]
  --db-url        URL      Database connection string  [default: env DATABASE_URL]
  --metrics-bind  IP:PORT  Prometheus scrape address   [default: env METRICS_BIND, disabled if unset]

FLAGS:
  --in-memory              Keep all state in process (nothing survives a restart)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  STORAGE_BACKEND          postgres | memory
  TURN_TIMEOUT_MS          Time a seat has to act
  DISCONNECT_GRACE_MS      Time a dropped player keeps the seat
  BOT_FILL_DELAY_MS        Wait before zero-stake queues are filled with bots
  RUST_LOG                 Log filter (default: info,sqlx=warn,hyper=warn)
  (Variables are also read from a .env file in the working directory)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    metrics_bind: Option<SocketAddr>,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        metrics_bind: pargs.opt_value_from_str("--metrics-bind")?,
        in_memory: pargs.contains("--in-memory"),
    };
    let remaining = pargs.finish();
    if !remaining.is_empty() {
        anyhow::bail!("Unexpected arguments: {remaining:?}");
    }

    let mut config = ServerConfig::from_env(args.bind, args.database_url)?;
    if args.in_memory {
        config.backend = Backend::InMemory;
    }
    if args.metrics_bind.is_some() {
        config.metrics_bind = args.metrics_bind;
    }
    config.validate()?;

    logging::init();

    // First SIGINT/SIGTERM drains connections; a second one exits at once.
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut interrupted = false;
    set_handler(move || {
        if interrupted {
            std::process::exit(130);
        }
        interrupted = true;
        let _ = shutdown_tx.send(());
    })?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let state = match config.backend {
        Backend::Postgres => {
            info!("Connecting to database");
            let db = Database::connect_and_migrate(&config.database).await?;
            AppState::postgres(&config, db)
        }
        Backend::InMemory => {
            warn!("Running with in-memory storage; matches will not survive a restart");
            AppState::in_memory(&config)
        }
    };

    match state.controller.recover_active_matches().await {
        Ok(count) => {
            metrics::matches_recovered(count);
            info!("Recovered {} active match(es)", count);
        }
        Err(e) => error!("Failed to recover active matches: {}", e),
    }

    let app = api::create_router(state.clone());

    info!("Starting HTTP/WebSocket server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = state.database {
        db.close().await;
    }

    Ok(())
}

/// Resolves on the first termination signal.
async fn shutdown_signal(mut signals: UnboundedReceiver<()>) {
    if signals.recv().await.is_none() {
        warn!("Signal handler dropped; shutdown only by process kill");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining connections");
}
