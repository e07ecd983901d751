use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use staybook::config::Config;
use staybook::engine::{Engine, RequestContext};
use staybook::notify::NotifyHub;
use staybook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    staybook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify.clone())?);

    if let Some(email) = &config.admin_email {
        let admin = engine
            .bootstrap_admin(&RequestContext::with_timeout(Duration::from_secs(10)), email)
            .await?;
        info!("admin account: {} ({})", admin.email, admin.id);
    }

    info!("staybook engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown_token = CancellationToken::new();
    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        shutdown_token.clone(),
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
        shutdown_token.clone(),
    ));
    let pruner_token = shutdown_token.clone();
    let pruner_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = pruner_token.cancelled() => break,
                _ = interval.tick() => notify.prune(),
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c: stop background tasks, then compact.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, stopping background tasks");
    shutdown_token.cancel();
    for task in [sweeper_task, compactor_task, pruner_task] {
        if let Err(e) = task.await {
            tracing::error!("background task ended abnormally: {e}");
        }
    }

    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("staybook stopped");
    Ok(())
}
