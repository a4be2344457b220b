use std::{path::Path, time::Duration};

use anyhow::Context;
use common::{MachineConfigSpec, TimeConfig, TimeServerStatusSpec};
use serde::Deserialize;

use crate::ntp::SyncerOptions;

/// What kind of machine the node runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Metal,
    Cloud,
    /// Clock belongs to the host.
    Container,
}

impl Mode {
    pub fn can_sync_time(self) -> bool {
        !matches!(self, Mode::Container)
    }
}

/// Tuning for the SNTP worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NtpConfig {
    #[serde(with = "common::duration_secs")]
    pub poll_interval: Duration,
    #[serde(with = "common::duration_secs")]
    pub retry_interval: Duration,
    #[serde(with = "common::duration_secs")]
    pub query_timeout: Duration,
    pub step_threshold_ms: u64,
}

impl Default for NtpConfig {
    fn default() -> Self {
        let opts = SyncerOptions::default();
        NtpConfig {
            poll_interval: opts.poll_interval,
            retry_interval: opts.retry_interval,
            query_timeout: opts.query_timeout,
            step_threshold_ms: opts.step_threshold.as_millis() as u64,
        }
    }
}

impl NtpConfig {
    pub fn options(&self) -> SyncerOptions {
        SyncerOptions {
            poll_interval: self.poll_interval,
            retry_interval: self.retry_interval,
            query_timeout: self.query_timeout,
            step_threshold: Duration::from_millis(self.step_threshold_ms),
        }
    }
}

/// Daemon configuration file.
///
/// ```yaml
/// mode: metal
/// time:
///   disabled: false
///   bootTimeout: 120
///   servers: ["pool.ntp.org"]
/// ntp:
///   pollInterval: 64
///   stepThresholdMs: 128
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub time: TimeConfig,
    pub ntp: NtpConfig,
}

impl Config {
    pub fn machine_config(&self) -> MachineConfigSpec {
        MachineConfigSpec {
            time: self.time.clone(),
        }
    }

    pub fn time_servers(&self) -> TimeServerStatusSpec {
        TimeServerStatusSpec {
            ntp_servers: self.time.servers.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
