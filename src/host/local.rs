//! In-process host: capability registry in memory, store on disk

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{DeviceCapabilities, DeviceStore};
use crate::error::UpsError;
use crate::models::{Availability, DeviceIdentity, Scalar, STORE_EXPOSED_CAPABILITIES};

/// Capabilities a newly added UPS device starts with
pub const DEFAULT_CAPABILITIES: [&str; 7] = [
    "measure_battery",
    "measure_battery_runtime",
    "measure_temperature",
    "measure_voltage.input",
    "measure_voltage.output",
    "status",
    "alarm_status",
];

// ============================================================================
// LocalDevice
// ============================================================================

pub struct LocalDevice {
    pub identity: DeviceIdentity,
    capabilities: RwLock<Vec<String>>,
    values: RwLock<HashMap<String, Scalar>>,
    availability: RwLock<Availability>,
    /// Where the exposed capability list is saved on every add/remove
    store: Option<Arc<dyn DeviceStore>>,
}

impl LocalDevice {
    /// New device exposing the default capability set
    pub fn new(identity: DeviceIdentity) -> Self {
        Self::with_capabilities(
            identity,
            DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        )
    }

    pub fn with_capabilities(identity: DeviceIdentity, capabilities: Vec<String>) -> Self {
        Self {
            identity,
            capabilities: RwLock::new(capabilities),
            values: RwLock::new(HashMap::new()),
            availability: RwLock::new(Availability::Unavailable {
                reason: "Not polled yet".to_string(),
                since: Utc::now(),
            }),
            store: None,
        }
    }

    /// Device backed by `store`: exposes the capability list saved by a
    /// previous run, or the defaults when none was saved yet
    pub async fn restore(
        identity: DeviceIdentity,
        store: Arc<dyn DeviceStore>,
    ) -> Result<Self, UpsError> {
        let mut device = match store.get(STORE_EXPOSED_CAPABILITIES).await? {
            Some(Value::Null) | None => Self::new(identity),
            Some(value) => {
                let capabilities: Vec<String> = serde_json::from_value(value)?;
                tracing::info!(
                    "[{}] Restored {} capabilities",
                    identity.name,
                    capabilities.len()
                );
                Self::with_capabilities(identity, capabilities)
            }
        };
        device.store = Some(store);
        Ok(device)
    }

    #[cfg(test)]
    pub async fn availability(&self) -> Availability {
        self.availability.read().await.clone()
    }

    async fn save_capabilities(&self, capabilities: &[String]) -> Result<(), UpsError> {
        match &self.store {
            Some(store) => {
                store
                    .set(STORE_EXPOSED_CAPABILITIES, serde_json::json!(capabilities))
                    .await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceCapabilities for LocalDevice {
    async fn has_capability(&self, name: &str) -> bool {
        self.capabilities.read().await.iter().any(|c| c == name)
    }

    async fn add_capability(&self, name: &str) -> Result<(), UpsError> {
        let mut caps = self.capabilities.write().await;
        if caps.iter().any(|c| c == name) {
            return Ok(());
        }
        caps.push(name.to_string());
        self.save_capabilities(&caps).await
    }

    async fn remove_capability(&self, name: &str) -> Result<(), UpsError> {
        let mut caps = self.capabilities.write().await;
        let before = caps.len();
        caps.retain(|c| c != name);
        if caps.len() == before {
            return Err(UpsError::Capability(format!("{} is not exposed", name)));
        }
        self.values.write().await.remove(name);
        self.save_capabilities(&caps).await
    }

    async fn capabilities(&self) -> Vec<String> {
        self.capabilities.read().await.clone()
    }

    async fn capability_value(&self, name: &str) -> Option<Scalar> {
        self.values.read().await.get(name).cloned()
    }

    async fn set_capability_value(&self, name: &str, value: Scalar) -> Result<(), UpsError> {
        if !self.has_capability(name).await {
            return Err(UpsError::CapabilityWrite {
                capability: name.to_string(),
                reason: "capability not exposed".to_string(),
            });
        }

        let previous = self
            .values
            .write()
            .await
            .insert(name.to_string(), value.clone());
        if previous.as_ref() != Some(&value) {
            tracing::info!("[{}] {} = {}", self.identity.name, name, value);
        }
        Ok(())
    }

    async fn set_available(&self) {
        let mut availability = self.availability.write().await;
        if !availability.is_available() {
            tracing::info!("[{}] Device available", self.identity.name);
            *availability = Availability::Available { since: Utc::now() };
        }
    }

    async fn set_unavailable(&self, reason: &str) {
        let mut availability = self.availability.write().await;
        let changed = match &*availability {
            Availability::Unavailable { reason: current, .. } => current != reason,
            Availability::Available { .. } => true,
        };
        if changed {
            tracing::warn!("[{}] Device unavailable: {}", self.identity.name, reason);
            *availability = Availability::Unavailable {
                reason: reason.to_string(),
                since: Utc::now(),
            };
        }
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Store kept only in memory
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, UpsError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), UpsError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store persisted as one JSON object per device
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, starting empty when the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, UpsError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(UpsError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &Map<String, Value>) -> Result<(), UpsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| UpsError::Storage(e.to_string()))?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| UpsError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| UpsError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, UpsError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), UpsError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }
}
