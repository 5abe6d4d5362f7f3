//! Host platform interface
//!
//! - `DeviceCapabilities`: live capability set, values and availability of a device
//! - `DeviceStore`: persistent key-value storage owned by one device
//! - `local`: in-process implementations used by the binary

pub mod local;

use async_trait::async_trait;

use crate::error::UpsError;
use crate::models::Scalar;

pub use local::{JsonFileStore, LocalDevice, MemoryStore};

/// Capabilities exposed by a device on the host
#[async_trait]
pub trait DeviceCapabilities: Send + Sync {
    async fn has_capability(&self, name: &str) -> bool;

    async fn add_capability(&self, name: &str) -> Result<(), UpsError>;

    async fn remove_capability(&self, name: &str) -> Result<(), UpsError>;

    /// Currently exposed capability names
    async fn capabilities(&self) -> Vec<String>;

    async fn capability_value(&self, name: &str) -> Option<Scalar>;

    /// Fails with [`UpsError::CapabilityWrite`] when the host rejects the value
    async fn set_capability_value(&self, name: &str, value: Scalar) -> Result<(), UpsError>;

    async fn set_available(&self);

    async fn set_unavailable(&self, reason: &str);
}

/// Per-device persistent storage
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, UpsError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), UpsError>;
}
