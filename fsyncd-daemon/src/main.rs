use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use fsyncd_daemon::config::DaemonConfig;
use fsyncd_daemon::drivers::{self, make_config_source};
use fsyncd_daemon::scheduler::SyncScheduler;
use fsyncd_daemon::server::{self, AppState};
use fsyncd_engine::{CancelToken, SyncError, SyncGate};

fn init_tracing(config: &DaemonConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(config.time_format.clone()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("FSYNCD_CONFIG").unwrap_or_else(|_| "fsyncd.toml".to_string());
    let config = Arc::new(
        DaemonConfig::load(&config_path)
            .with_context(|| format!("load master configuration from {config_path}"))?,
    );
    init_tracing(&config);

    let tz = config.timezone().context("resolve location")?;
    info!(location = %config.location, "starting fsyncd");

    let driver_path = std::env::var("FSYNCD_DRIVER_CONFIG")
        .unwrap_or_else(|_| drivers::DEFAULT_DRIVER_CONFIG_PATH.to_string());
    let source = make_config_source(config.config_driver, driver_path)
        .context("set up config driver")?;

    let sync_config = source
        .load()
        .await
        .context("load sync configuration")?;

    let gate = Arc::new(SyncGate::new());
    let cancel = CancelToken::new();

    // SIGINT and SIGTERM both begin a graceful shutdown
    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
            cancel.cancel();
        });
    }

    // reconcile once at startup; a failure here is logged, not fatal
    if let Some(_guard) = gate.acquire() {
        match fsyncd_engine::reconcile(
            &sync_config.src_path,
            &sync_config.dst_path,
            sync_config.max_diff_percent,
            &cancel,
        )
        .await
        {
            Ok(()) => info!("startup reconciliation finished"),
            Err(err @ SyncError::TooLargeDifference { .. }) => {
                warn!(error = %err, "startup reconciliation abandoned");
            }
            Err(err) if err.is_fatal() => {
                return Err(anyhow!(err)).context("startup reconciliation");
            }
            Err(err) => error!(error = %err, "startup reconciliation failed"),
        }
    }

    let state = Arc::new(AppState {
        gate: gate.clone(),
        source: source.clone(),
        cancel: cancel.clone(),
    });

    let server_task = {
        let cancel = cancel.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let result = server::serve(config, state).await;
            cancel.cancel();
            result
        })
    };

    let scheduler_task = {
        let cancel = cancel.clone();
        let scheduler = SyncScheduler::new(source, gate, tz);
        tokio::spawn(async move {
            let result = scheduler.run(sync_config, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    let (server_result, scheduler_result) =
        tokio::try_join!(server_task, scheduler_task).context("daemon task panicked")?;
    server_result.context("control surface failed")?;
    scheduler_result
        .map_err(|e| anyhow!(e))
        .context("scheduler failed")?;

    info!("fsyncd stopped");
    Ok(())
}
