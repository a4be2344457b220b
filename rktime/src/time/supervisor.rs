use std::{future, sync::Arc};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::sync::SyncState;

/// The background time sync worker as seen by the controller.
#[async_trait]
pub trait NtpSyncer: Send + Sync {
    /// Run the sync loop until `cancel` fires.
    async fn run(&self, cancel: CancellationToken);

    /// Replace the server list, picked up on the next sync cycle.
    fn set_time_servers(&self, servers: Vec<String>);
}

/// Signals a worker reports back to the controller.
pub struct SyncerSignals {
    /// Fires once, the first time the clock is in sync.
    pub synced: oneshot::Receiver<()>,
    /// Fires on every clock step.
    pub epoch_change: mpsc::UnboundedReceiver<()>,
}

/// Builds a worker for the given servers. Swapped out in tests.
pub type NewSyncerFn =
    Arc<dyn Fn(Vec<String>) -> (Arc<dyn NtpSyncer>, SyncerSignals) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Synced,
    EpochChanged,
}

struct SyncerHandle {
    syncer: Arc<dyn NtpSyncer>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    synced: Option<oneshot::Receiver<()>>,
    epoch_change: Option<mpsc::UnboundedReceiver<()>>,
}

/// Owns at most one running worker.
pub struct WorkerSupervisor {
    new_syncer: NewSyncerFn,
    active: Option<SyncerHandle>,
}

impl WorkerSupervisor {
    pub fn new(new_syncer: NewSyncerFn) -> Self {
        WorkerSupervisor {
            new_syncer,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Start a worker under a child of `parent` and reset `state.synced`.
    pub fn start(
        &mut self,
        servers: Vec<String>,
        parent: &CancellationToken,
        state: &mut SyncState,
    ) {
        if self.is_running() {
            error!("refusing to start a second time sync worker");
            return;
        }

        info!(?servers, "starting time sync");
        let (syncer, signals) = (self.new_syncer)(servers);
        let cancel = parent.child_token();
        let task = tokio::spawn({
            let syncer = syncer.clone();
            let cancel = cancel.clone();
            async move { syncer.run(cancel).await }
        });

        state.synced = false;
        self.active = Some(SyncerHandle {
            syncer,
            cancel,
            task,
            synced: Some(signals.synced),
            epoch_change: Some(signals.epoch_change),
        });
    }

    /// Cancel the worker and wait for its task to finish.
    pub async fn stop(&mut self) {
        let Some(handle) = self.active.take() else {
            return;
        };

        info!("stopping time sync");
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!("time sync worker panicked: {e}");
            } else {
                warn!("time sync worker aborted: {e}");
            }
        }
    }

    /// Forward the server list to the running worker, if any.
    pub fn set_time_servers(&self, servers: &[String]) {
        if let Some(handle) = &self.active {
            handle.syncer.set_time_servers(servers.to_vec());
        }
    }

    /// Next signal from the running worker. Pending forever without one.
    ///
    /// Cancel safe. The synced signal is consumed once per worker.
    pub async fn signal(&mut self) -> WorkerSignal {
        let Some(handle) = self.active.as_mut() else {
            return future::pending().await;
        };

        loop {
            tokio::select! {
                res = recv_synced(&mut handle.synced) => {
                    handle.synced = None;
                    if res.is_ok() {
                        return WorkerSignal::Synced;
                    }
                }
                msg = recv_epoch(&mut handle.epoch_change) => match msg {
                    Some(()) => return WorkerSignal::EpochChanged,
                    None => handle.epoch_change = None,
                },
            }
        }
    }
}

async fn recv_synced(
    rx: &mut Option<oneshot::Receiver<()>>,
) -> Result<(), oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => future::pending().await,
    }
}

async fn recv_epoch(rx: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}
