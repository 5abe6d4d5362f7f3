//! Error handling module

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpsError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {secs}s while {step}")]
    Timeout { step: &'static str, secs: u64 },

    #[error("Capability write failed for {capability}: {reason}")]
    CapabilityWrite { capability: String, reason: String },

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid setting: {0}")]
    Settings(String),
}

impl UpsError {
    /// Short reason shown to the user while the device is unavailable
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for UpsError {
    fn from(e: std::io::Error) -> Self {
        UpsError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for UpsError {
    fn from(e: serde_json::Error) -> Self {
        UpsError::Storage(e.to_string())
    }
}
