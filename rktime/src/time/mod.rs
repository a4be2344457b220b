//! Node time synchronization controller.
//!
//! [`SyncController`] watches the resolved time servers and the machine
//! config, runs at most one NTP worker through [`WorkerSupervisor`], tracks
//! the boot sync deadline and publishes the aggregated `TimeStatusSpec`.

mod status;
mod supervisor;
mod sync;
mod timer;

pub use status::publish;
pub use supervisor::{NewSyncerFn, NtpSyncer, SyncerSignals, WorkerSignal, WorkerSupervisor};
pub use sync::{Deadline, Event, SyncController, SyncState, boot_deadline};
pub use timer::TimeoutTimer;
