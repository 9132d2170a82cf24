use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use repost_scheduler::clock::{Clock, SystemClock};
use repost_scheduler::config;
use repost_scheduler::db;
use repost_scheduler::pipeline::{self, Pipeline};
use repost_scheduler::scheduler::Scheduler;

#[derive(Debug, Parser)]
#[command(author, version, about = "Runs the repost pipeline jobs on their schedules")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Seconds to wait for running jobs after a shutdown signal
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,

    /// Run every job once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url())
        .await
        .context("database connection failed")?;
    db::run_migrations(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Arc::new(Pipeline::simulated(pool, clock.clone(), &cfg));

    if args.once {
        pipeline::run_all_once(&pipeline).await?;
        info!("ran every job once, exiting");
        return Ok(());
    }

    let mut scheduler = Scheduler::new(clock);
    pipeline::register_jobs(&mut scheduler, pipeline, &cfg.schedule)?;
    scheduler.start()?;
    info!("Scheduler started successfully");

    shutdown_signal().await;
    info!("shutdown requested, waiting for running jobs");

    let grace = Duration::from_secs(args.shutdown_grace_secs);
    if tokio::time::timeout(grace, scheduler.stop()).await.is_err() {
        warn!(grace_secs = args.shutdown_grace_secs, "jobs still running after grace period");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
