mod resource;
mod time;

pub use resource::{Metadata, Pointer, Resource, ResourceSpec};
pub use time::{
    MachineConfigSpec, TIME_SERVER_ID, TIME_STATUS_ID, TimeConfig, TimeServerStatusSpec,
    TimeStatusSpec, V1ALPHA1_ID,
};

pub const NAMESPACE_CONFIG: &str = "config";
pub const NAMESPACE_NETWORK: &str = "network";
pub const NAMESPACE_RUNTIME: &str = "runtime";

/// Serialize a [`std::time::Duration`] as whole seconds.
///
/// Use with `#[serde(with = "common::duration_secs")]`.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
