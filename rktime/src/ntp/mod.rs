//! SNTP time sync worker.
//!
//! Queries the configured servers in order until one answers, steps the
//! system clock when the offset is too large, and reports back through
//! [`SyncerSignals`].

pub mod packet;

use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use nix::{sys::time::TimeSpec, time::ClockId};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::time::{NewSyncerFn, NtpSyncer, SyncerSignals};
use packet::{NtpTimestamp, PACKET_LEN};

const NTP_PORT: u16 = 123;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerOptions {
    /// Wait between successful polls.
    pub poll_interval: Duration,
    /// Wait after a cycle where no server answered.
    pub retry_interval: Duration,
    pub query_timeout: Duration,
    /// Offsets above this are corrected by stepping the clock.
    pub step_threshold: Duration,
}

impl Default for SyncerOptions {
    fn default() -> Self {
        SyncerOptions {
            poll_interval: Duration::from_secs(64),
            retry_interval: Duration::from_secs(5),
            query_timeout: Duration::from_secs(3),
            step_threshold: Duration::from_millis(128),
        }
    }
}

pub struct Syncer {
    servers: RwLock<Vec<String>>,
    options: SyncerOptions,
    synced_tx: Mutex<Option<oneshot::Sender<()>>>,
    epoch_tx: mpsc::UnboundedSender<()>,
}

impl Syncer {
    pub fn new(servers: Vec<String>, options: SyncerOptions) -> (Arc<Self>, SyncerSignals) {
        let (synced_tx, synced) = oneshot::channel();
        let (epoch_tx, epoch_change) = mpsc::unbounded_channel();
        let syncer = Arc::new(Syncer {
            servers: RwLock::new(servers),
            options,
            synced_tx: Mutex::new(Some(synced_tx)),
            epoch_tx,
        });
        (
            syncer,
            SyncerSignals {
                synced,
                epoch_change,
            },
        )
    }

    /// Worker factory for the sync controller.
    pub fn factory(options: SyncerOptions) -> NewSyncerFn {
        Arc::new(move |servers| {
            let (syncer, signals) = Syncer::new(servers, options.clone());
            (syncer as Arc<dyn NtpSyncer>, signals)
        })
    }

    fn servers(&self) -> Vec<String> {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// One sync cycle. Returns whether any server answered.
    async fn poll_once(&self) -> bool {
        let servers = self.servers();
        if servers.is_empty() {
            debug!("no time servers configured");
            return false;
        }

        for server in &servers {
            match query(server, self.options.query_timeout).await {
                Ok(offset) => {
                    debug!(server = %server, offset_ns = offset as i64, "time server answered");
                    self.adjust(server, offset);
                    self.mark_synced();
                    return true;
                }
                Err(e) => warn!(server = %server, "time query failed: {e:#}"),
            }
        }
        false
    }

    fn adjust(&self, server: &str, offset: i128) {
        let magnitude = packet::offset_magnitude(offset);
        if magnitude <= self.options.step_threshold {
            return;
        }

        info!(server = %server, ?magnitude, ahead = offset < 0, "stepping system clock");
        match step_clock(offset) {
            Ok(()) => {
                // receiver gone means the controller stopped listening
                let _ = self.epoch_tx.send(());
            }
            Err(e) => warn!("failed to step system clock: {e:#}"),
        }
    }

    fn mark_synced(&self) {
        let tx = self
            .synced_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = tx {
            info!("time is in sync");
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl NtpSyncer for Syncer {
    async fn run(&self, cancel: CancellationToken) {
        loop {
            let answered = tokio::select! {
                _ = cancel.cancelled() => return,
                answered = self.poll_once() => answered,
            };

            let wait = if answered {
                self.options.poll_interval
            } else {
                self.options.retry_interval
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn set_time_servers(&self, servers: Vec<String>) {
        let mut current = self.servers.write().unwrap_or_else(|e| e.into_inner());
        if *current != servers {
            info!(?servers, "time servers updated");
            *current = servers;
        }
    }
}

async fn resolve(server: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, NTP_PORT));
    }

    let target = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{NTP_PORT}")
    };
    tokio::net::lookup_host(&target)
        .await
        .with_context(|| format!("failed to resolve {target}"))?
        .next()
        .ok_or_else(|| anyhow!("no addresses for {target}"))
}

/// Ask one server for the local clock offset in nanoseconds.
pub async fn query(server: &str, timeout: Duration) -> anyhow::Result<i128> {
    let addr = resolve(server).await?;
    let bind: SocketAddr = if addr.is_ipv4() {
        (IpAddr::from([0u8; 4]), 0).into()
    } else {
        (IpAddr::from([0u16; 8]), 0).into()
    };

    let socket = UdpSocket::bind(bind)
        .await
        .context("failed to bind udp socket")?;
    socket
        .connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let sent = NtpTimestamp::now();
    socket
        .send(&packet::request(sent))
        .await
        .context("failed to send request")?;

    let mut buf = [0u8; PACKET_LEN * 2];
    let n = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| anyhow!("no reply within {timeout:?}"))?
        .context("failed to read reply")?;
    let received = NtpTimestamp::now();

    let reply = packet::parse_reply(&buf[..n], sent)?;
    Ok(packet::offset(sent, &reply, received))
}

fn step_clock(offset: i128) -> anyhow::Result<()> {
    let target = NtpTimestamp::now().unix_nanos() + offset;
    let target = u64::try_from(target).context("target time before the unix epoch")?;
    let ts = TimeSpec::from(Duration::from_nanos(target));
    nix::time::clock_settime(ClockId::CLOCK_REALTIME, ts).context("clock_settime")?;
    Ok(())
}
