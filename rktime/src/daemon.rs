use std::path::{Path, PathBuf};

use anyhow::Context;
use common::{TIME_SERVER_ID, V1ALPHA1_ID};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, Mode, load_config};
use crate::controller::Controller;
use crate::ntp::Syncer;
use crate::runtime::MemoryStore;
use crate::time::SyncController;

/// Run the time sync controller until `cancel` fires or it fails.
///
/// The config file seeds the controller inputs. SIGHUP re-reads it and
/// republishes them.
pub async fn run(
    config_path: PathBuf,
    mode: Option<Mode>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let mode = mode.unwrap_or(config.mode);
    serve(config_path, config, mode, MemoryStore::new(), cancel).await
}

async fn serve(
    config_path: PathBuf,
    config: Config,
    mode: Mode,
    store: MemoryStore,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!(?mode, config = %config_path.display(), "starting rktime");
    publish_inputs(&store, &config).await?;

    let mut ctrl = SyncController::new(mode, Syncer::factory(config.ntp.options()));
    let mut rt = store.runtime(ctrl.name(), ctrl.inputs());

    let reload_cancel = cancel.child_token();
    let reload = tokio::spawn(watch_reload(
        config_path,
        mode,
        store.clone(),
        reload_cancel.clone(),
    ));

    let result = ctrl
        .run(&mut rt, cancel)
        .await
        .with_context(|| format!("controller {} failed", ctrl.name()));

    reload_cancel.cancel();
    if let Err(e) = reload.await {
        warn!("config reload task failed: {e}");
    }

    match &result {
        Ok(()) => info!("rktime stopped"),
        Err(e) => error!("{e:#}"),
    }
    result
}

/// Cancel `cancel` once `signal` fires. A failed registration is logged
/// and leaves the daemon running.
pub async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received CTRL-C, shutting down...");
            cancel.cancel();
        }
        Err(e) => error!("failed to listen for ctrl_c, shutdown on ctrl_c disabled: {e:?}"),
    }
}

async fn publish_inputs(store: &MemoryStore, config: &Config) -> anyhow::Result<()> {
    store
        .put(V1ALPHA1_ID, &config.machine_config())
        .await
        .context("failed to publish machine config")?;
    store
        .put(TIME_SERVER_ID, &config.time_servers())
        .await
        .context("failed to publish time servers")?;
    Ok(())
}

async fn reload(path: &Path, mode: Mode, store: &MemoryStore) -> anyhow::Result<()> {
    let config = load_config(path)?;
    if config.mode != mode {
        warn!(
            running = ?mode,
            configured = ?config.mode,
            "mode changes take effect on restart"
        );
    }
    publish_inputs(store, &config).await
}

async fn watch_reload(path: PathBuf, mode: Mode, store: MemoryStore, cancel: CancellationToken) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("failed to listen for SIGHUP, config reload disabled: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
                info!(config = %path.display(), "SIGHUP received, reloading config");
                if let Err(e) = reload(&path, mode, &store).await {
                    error!("failed to reload config: {e:#}");
                }
            }
        }
    }
}
