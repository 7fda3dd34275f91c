//! pseeview-daemon - Production Session Event read-model daemon
//!
//! Tails the PSEE event log, folds it into the in-memory session read
//! model, and serves the dashboard query surface over HTTP. The event log
//! is the source of truth: this process can be killed and restarted at any
//! time and resumes from its cursor checkpoint, or rebuilds from scratch
//! if the checkpoint is lost.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pseeview_core::cursor_store::SqliteCursorStore;
use pseeview_core::pipeline::SessionPipeline;
use pseeview_core::source::SqliteEventSource;
use pseeview_daemon::config::Config;
use pseeview_daemon::http;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// pseeview daemon - production session read model over HTTP
#[derive(Parser, Debug)]
#[command(name = "pseeview-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP query surface (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Path to the PSEE event log database (overrides the config file)
    #[arg(long)]
    event_db: Option<PathBuf>,

    /// Path to the cursor checkpoint database (overrides the config file)
    #[arg(long)]
    cursor_db: Option<PathBuf>,

    /// Poll interval in milliseconds (overrides the config file)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Log level filter (e.g. "info", "pseeview_core=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Merges the config file with command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(event_db) = &args.event_db {
        config.pipeline.event_db.clone_from(event_db);
    }
    if let Some(cursor_db) = &args.cursor_db {
        config.pipeline.cursor_db.clone_from(cursor_db);
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        config.pipeline.poll_interval_ms = poll_interval_ms;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    let source = SqliteEventSource::open(&config.pipeline.event_db)
        .with_context(|| format!("opening event log {}", config.pipeline.event_db.display()))?;
    let cursor_store = SqliteCursorStore::open(&config.pipeline.cursor_db).with_context(|| {
        format!("opening cursor store {}", config.pipeline.cursor_db.display())
    })?;
    let pipeline = Arc::new(SessionPipeline::new(
        source,
        cursor_store,
        config.pipeline.consumer_config(),
    ));

    pipeline.initialize().await;

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "query surface listening");

    axum::serve(listener, http::router(Arc::clone(&pipeline)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    // Let a tick in flight finish and checkpoint before exiting.
    pipeline.shutdown().await;
    info!("daemon stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to install the SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
