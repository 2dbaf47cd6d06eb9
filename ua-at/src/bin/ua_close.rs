//! ua-close - one-shot session closer for cron
//!
//! Marks ABSENT for every enrolled identity without a record in sections
//! whose end + grace has passed today. Exits non-zero only when storage
//! fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ua_at::config::EngineConfig;
use ua_at::notify::{FanoutSink, LogSink, NotificationSink, OutboxSink};
use ua_at::AppState;
use ua_common::config::{load_default_toml, prepare_root_folder, resolve_root_folder, ROOT_FOLDER_ENV};
use ua_common::db::init_database;
use ua_common::EventBus;

/// Command-line arguments for ua-close
#[derive(Parser, Debug)]
#[command(name = "ua-close")]
#[command(about = "Mark absences for elapsed class sessions")]
#[command(version)]
struct Args {
    /// Root folder holding ua.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Minutes after a section's end before absences are final
    #[arg(long = "grace-min")]
    grace_min: Option<i64>,

    /// Evaluate as of this instant (RFC 3339) instead of now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let toml_config = load_default_toml();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &toml_config.logging.level;
                format!("ua_at={level},ua_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting ua-close v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&toml_config));
    let db_path = prepare_root_folder(&root_folder).context("Failed to prepare root folder")?;
    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let config = EngineConfig::load(&pool).await.apply_toml(&toml_config);
    let grace = args.grace_min.unwrap_or(config.closer_grace_minutes);
    anyhow::ensure!(grace >= 0, "--grace-min must not be negative");

    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(OutboxSink::new(pool.clone())), Arc::new(LogSink)];
    let state = AppState::new(pool.clone(), config, Arc::new(FanoutSink::new(sinks)), EventBus::new(16));

    let at = args.at.unwrap_or_else(ua_common::time::now);
    let report = state
        .closer
        .close_elapsed_sessions(at, grace)
        .await
        .context("Closer run failed")?;

    println!("{}", report.absences_marked);
    pool.close().await;
    Ok(())
}
