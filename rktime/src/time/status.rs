use common::{TIME_STATUS_ID, TimeStatusSpec};
use tracing::debug;

use crate::runtime::{Runtime, RuntimeExt, StoreError};

/// Upsert the node time status. Every field is overwritten.
pub async fn publish(rt: &dyn Runtime, status: TimeStatusSpec) -> Result<(), StoreError> {
    let md = rt
        .modify_typed::<TimeStatusSpec, _>(TIME_STATUS_ID, |spec| *spec = status)
        .await?;
    debug!(
        version = md.version,
        epoch = status.epoch,
        synced = status.synced,
        sync_disabled = status.sync_disabled,
        "published time status"
    );
    Ok(())
}
