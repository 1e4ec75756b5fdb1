//! Application entry point for the `pollenflow` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite pool and applying pending schema migrations
//! - Building the [`AppContext`] and restoring the personal threshold
//! - Starting the high-risk event logger and the periodic refresh
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – SQLite connection string
//! - `LISTEN_ADDR` (optional) – bind address (default: `0.0.0.0:8080`)
//! - `POLLEN_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `POLLEN_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list.
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use pollenflow::{config, refresh, routes, schema, AppContext, Notifier};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to open database: {}", cfg.db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| format!("Failed to open database '{}'", cfg.db_url))?;

    tracing::info!("Successfully opened database");

    let applied = schema::apply_migrations(&pool).await?;
    tracing::info!("{} schema migration(s) applied", applied);

    let ctx = AppContext::from_config(&cfg, pool)?;

    // The threshold only lives in memory; rebuild it from the diary.
    match ctx.personal.refresh(ctx.store.as_ref()).await {
        Ok(threshold) => tracing::info!("Personal risk threshold: {:.1}", threshold),
        Err(e) => tracing::warn!("Starting with default threshold: {}", e),
    }

    spawn_event_logger(&ctx.notifier);

    let refresh_task = cfg.refresh_interval.map(|interval| {
        refresh::spawn_periodic_refresh(
            Arc::clone(&ctx.pipeline),
            Arc::clone(&ctx.tracker),
            interval,
            ctx.run_deadline,
        )
    });

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(ctx);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = refresh_task {
        task.abort();
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}

// ---

/// Log every high-risk event. Delivering them is somebody else's job.
fn spawn_event_logger(notifier: &Notifier) {
    // ---
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::warn!(
                    "High pollen risk at {}: {:.0}% of personal threshold (risk {:.1})",
                    event.cell_id,
                    event.percent,
                    event.risk_level
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event logger fell behind, {} events missed", missed)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `POLLEN_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `POLLEN_LOG_LEVEL` env var
///
/// Call once at startup, before any other tracing macro fires.
fn init_tracing() {
    // ---
    let span_events = match env::var("POLLEN_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("POLLEN_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
