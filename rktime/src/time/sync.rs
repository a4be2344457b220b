use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use common::{
    MachineConfigSpec, TIME_SERVER_ID, TimeServerStatusSpec, TimeStatusSpec, V1ALPHA1_ID,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::status;
use super::supervisor::{NewSyncerFn, WorkerSignal, WorkerSupervisor};
use super::timer::TimeoutTimer;
use crate::config::Mode;
use crate::controller::{Controller, Input, InputKind, Output, OutputKind};
use crate::runtime::{Runtime, RuntimeExt};

/// What woke the reconcile loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Cancelled,
    InputChanged,
    Synced,
    EpochChanged,
    TimeoutElapsed,
}

impl From<WorkerSignal> for Event {
    fn from(signal: WorkerSignal) -> Self {
        match signal {
            WorkerSignal::Synced => Event::Synced,
            WorkerSignal::EpochChanged => Event::EpochChanged,
        }
    }
}

/// Loop state carried across reconciles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Clock steps seen, never reset.
    pub epoch: u64,
    pub synced: bool,
}

impl SyncState {
    /// Record a wakeup. Breaks on cancellation.
    pub fn apply(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Cancelled => return ControlFlow::Break(()),
            Event::InputChanged => {}
            Event::Synced | Event::TimeoutElapsed => self.synced = true,
            Event::EpochChanged => self.epoch += 1,
        }
        ControlFlow::Continue(())
    }

    pub fn status(&self, sync_disabled: bool) -> TimeStatusSpec {
        TimeStatusSpec {
            epoch: self.epoch,
            synced: self.synced,
            sync_disabled,
        }
    }
}

/// Where boot time stands against the configured sync timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Timeout is zero, nothing to wait for.
    Disabled,
    Passed,
    Remaining(Duration),
}

pub fn boot_deadline(timeout: Duration, since_boot: Duration) -> Deadline {
    if timeout.is_zero() {
        Deadline::Disabled
    } else if since_boot > timeout {
        Deadline::Passed
    } else {
        Deadline::Remaining(timeout - since_boot)
    }
}

/// Inputs of one reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Desired {
    servers: Vec<String>,
    sync_disabled: bool,
    boot_timeout: Duration,
}

/// Keeps the time status and the NTP worker in line with machine config.
pub struct SyncController {
    mode: Mode,
    new_syncer: NewSyncerFn,
    boot_time: Option<Instant>,
}

impl SyncController {
    pub fn new(mode: Mode, new_syncer: NewSyncerFn) -> Self {
        SyncController {
            mode,
            new_syncer,
            boot_time: None,
        }
    }

    /// Read inputs. `None` while the time server list isn't published yet.
    async fn desired(&self, rt: &dyn Runtime) -> anyhow::Result<Option<Desired>> {
        let servers = match rt.get_typed::<TimeServerStatusSpec>(TIME_SERVER_ID).await {
            Ok(res) => res.spec.ntp_servers,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e).context("error getting time server status"),
        };

        let cfg = match rt.get_typed::<MachineConfigSpec>(V1ALPHA1_ID).await {
            Ok(res) => Some(res.spec),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e).context("error getting config"),
        };

        let sync_disabled = !self.mode.can_sync_time()
            || cfg.as_ref().is_some_and(|cfg| cfg.time.disabled);
        let boot_timeout = cfg.map(|cfg| cfg.time.boot_timeout).unwrap_or_default();

        Ok(Some(Desired {
            servers,
            sync_disabled,
            boot_timeout,
        }))
    }
}

#[async_trait]
impl Controller for SyncController {
    fn name(&self) -> &'static str {
        "time.SyncController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::of::<TimeServerStatusSpec>(Some(TIME_SERVER_ID), InputKind::Weak),
            Input::of::<MachineConfigSpec>(Some(V1ALPHA1_ID), InputKind::Strong),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<TimeStatusSpec>(OutputKind::Exclusive)]
    }

    async fn run(
        &mut self,
        rt: &mut dyn Runtime,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let boot_time = *self.boot_time.get_or_insert_with(Instant::now);
        let mut sync_loop = SyncLoop {
            boot_time,
            state: SyncState::default(),
            supervisor: WorkerSupervisor::new(self.new_syncer.clone()),
            timer: TimeoutTimer::default(),
            published: None,
        };

        let result = sync_loop.run(self, rt, &cancel).await;

        sync_loop.supervisor.stop().await;
        sync_loop.timer.disarm();
        result
    }
}

/// Everything the loop mutates, owned by the loop alone.
struct SyncLoop {
    boot_time: Instant,
    state: SyncState,
    supervisor: WorkerSupervisor,
    timer: TimeoutTimer,
    published: Option<TimeStatusSpec>,
}

impl SyncLoop {
    async fn run(
        &mut self,
        ctrl: &SyncController,
        rt: &mut dyn Runtime,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => Event::Cancelled,
                res = rt.next_event() => {
                    res.context("error waiting for resource events")?;
                    Event::InputChanged
                }
                signal = self.supervisor.signal() => signal.into(),
                () = self.timer.fired() => Event::TimeoutElapsed,
            };

            debug!(?event, "time sync wakeup");
            if self.state.apply(event).is_break() {
                return Ok(());
            }

            self.reconcile(ctrl, rt, cancel).await?;
        }
    }

    async fn reconcile(
        &mut self,
        ctrl: &SyncController,
        rt: &dyn Runtime,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let Some(desired) = ctrl.desired(rt).await? else {
            debug!("time server list is not ready yet, waiting for the next event");
            return Ok(());
        };

        self.apply_deadline(desired.boot_timeout);

        match (desired.sync_disabled, self.supervisor.is_running()) {
            (true, true) => self.supervisor.stop().await,
            (false, false) => {
                self.supervisor
                    .start(desired.servers.clone(), cancel, &mut self.state);
                // fresh worker is unsynced, the deadline covers it again
                self.apply_deadline(desired.boot_timeout);
            }
            _ => {}
        }

        self.supervisor.set_time_servers(&desired.servers);

        if desired.sync_disabled {
            self.state.synced = true;
            self.timer.disarm();
        }

        let status = self.state.status(desired.sync_disabled);
        status::publish(rt, status)
            .await
            .context("error updating objects")?;

        if self.published != Some(status) {
            info!(
                epoch = status.epoch,
                synced = status.synced,
                sync_disabled = status.sync_disabled,
                "time status changed"
            );
            self.published = Some(status);
        }

        Ok(())
    }

    /// Disarm once synced, otherwise hold the timer to the boot deadline.
    fn apply_deadline(&mut self, boot_timeout: Duration) {
        if self.state.synced {
            self.timer.disarm();
            return;
        }

        match boot_deadline(boot_timeout, self.boot_time.elapsed()) {
            Deadline::Disabled => self.timer.disarm(),
            Deadline::Passed => {
                info!(timeout = ?boot_timeout, "boot time sync timeout passed, considering time synced");
                self.state.synced = true;
                self.timer.disarm();
            }
            Deadline::Remaining(left) => {
                debug!(?left, "arming boot time sync timeout");
                self.timer.arm(left);
            }
        }
    }
}
