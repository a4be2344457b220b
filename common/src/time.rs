use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{NAMESPACE_CONFIG, NAMESPACE_NETWORK, NAMESPACE_RUNTIME, ResourceSpec};

/// Id of the resolved time server list.
pub const TIME_SERVER_ID: &str = "timeservers";
/// Id of the machine configuration document.
pub const V1ALPHA1_ID: &str = "v1alpha1";
/// Id of the node time status.
pub const TIME_STATUS_ID: &str = "node";

/// Time servers resolved from network configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeServerStatusSpec {
    #[serde(default)]
    pub ntp_servers: Vec<String>,
}

impl ResourceSpec for TimeServerStatusSpec {
    const NAMESPACE: &'static str = NAMESPACE_NETWORK;
    const TYPE: &'static str = "TimeServerStatuses.net.rk8s.dev";
}

/// The `time` section of the machine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConfig {
    #[serde(default)]
    pub disabled: bool,
    /// Zero means no boot deadline.
    #[serde(default, with = "crate::duration_secs")]
    pub boot_timeout: Duration,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfigSpec {
    #[serde(default)]
    pub time: TimeConfig,
}

impl ResourceSpec for MachineConfigSpec {
    const NAMESPACE: &'static str = NAMESPACE_CONFIG;
    const TYPE: &'static str = "MachineConfigs.config.rk8s.dev";
}

/// Aggregated time sync status of the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStatusSpec {
    pub epoch: u64,
    pub synced: bool,
    pub sync_disabled: bool,
}

impl ResourceSpec for TimeStatusSpec {
    const NAMESPACE: &'static str = NAMESPACE_RUNTIME;
    const TYPE: &'static str = "TimeStatuses.runtime.rk8s.dev";
}
