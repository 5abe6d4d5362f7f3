//! Capability lifecycle module
//!
//! - `reconcile`: Align the live device with each translated status

pub mod reconcile;

use crate::error::UpsError;
use crate::host::DeviceStore;
use crate::models::{PersistedCapabilityState, STORE_CAPABILITIES, STORE_FIRST_RUN};

pub use reconcile::{reconcile, ReconcileReport};

/// Read the persisted capability state of a device
pub async fn load_state(store: &dyn DeviceStore) -> Result<PersistedCapabilityState, UpsError> {
    let first_run = store
        .get(STORE_FIRST_RUN)
        .await?
        .and_then(|v| v.as_bool());

    let capabilities = match store.get(STORE_CAPABILITIES).await? {
        Some(serde_json::Value::Null) | None => None,
        Some(value) => Some(serde_json::from_value::<Vec<String>>(value)?),
    };

    Ok(PersistedCapabilityState {
        first_run,
        capabilities,
    })
}
