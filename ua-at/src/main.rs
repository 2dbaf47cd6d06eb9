//! Attendance tracker (ua-at) - HTTP service entry point
//!
//! Accepts badge scans from readers, assigns tags, answers attendance and
//! policy queries, and optionally runs the session closer on an interval.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ua_at::config::EngineConfig;
use ua_at::notify::{FanoutSink, LogSink, NotificationSink, OutboxSink, WebhookSink};
use ua_at::{build_router, AppState, EVENT_BUS_CAPACITY};
use ua_common::config::{load_default_toml, prepare_root_folder, resolve_root_folder, ROOT_FOLDER_ENV};
use ua_common::db::init_database;
use ua_common::EventBus;

/// Port used when neither the command line, environment nor TOML set one
const DEFAULT_PORT: u16 = 5780;

/// Command-line arguments for ua-at
#[derive(Parser, Debug)]
#[command(name = "ua-at")]
#[command(about = "RFID attendance tracker service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "UA_AT_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "UA_AT_BIND")]
    bind: String,

    /// Root folder holding ua.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Run the session closer every N seconds (0 disables)
    #[arg(long, default_value = "0", env = "UA_CLOSE_EVERY_SECS")]
    close_every_secs: u64,

    /// Also POST warning notifications to this URL
    #[arg(long, env = "UA_NOTIFY_WEBHOOK")]
    notify_webhook: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let toml_config = load_default_toml();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &toml_config.logging.level;
                format!("ua_at={level},ua_common={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any database delay
    info!(
        "Starting ua-at v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&toml_config));
    let db_path = prepare_root_folder(&root_folder).context("Failed to prepare root folder")?;
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let config = EngineConfig::load(&pool).await.apply_toml(&toml_config);

    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(OutboxSink::new(pool.clone())), Arc::new(LogSink)];
    if let Some(url) = &args.notify_webhook {
        sinks.push(Arc::new(WebhookSink::new(url.clone())?));
        info!("Webhook notifications enabled: {}", url);
    }

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(pool, config, Arc::new(FanoutSink::new(sinks)), event_bus);

    if args.close_every_secs > 0 {
        spawn_closer_schedule(state.clone(), Duration::from_secs(args.close_every_secs));
    }

    let app = build_router(state);

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", args.bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", args.bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("ua-at listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Run the closer on a fixed interval inside the service
fn spawn_closer_schedule(state: AppState, period: Duration) {
    info!(period_secs = period.as_secs(), "In-process session closer enabled");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let grace = state.config.closer_grace_minutes;
            if let Err(e) = state.closer.close_elapsed_sessions(ua_common::time::now(), grace).await {
                error!("Scheduled closer run failed: {}", e);
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
