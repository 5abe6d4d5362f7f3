//! Data models for the UPS poller

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Telemetry Models
// ============================================================================

/// Raw variables for one UPS as reported by the server (`battery.charge` → `"100"`)
pub type RawTelemetry = HashMap<String, String>;

/// A single capability value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numbers and booleans are always filled, text only when non-blank
    pub fn is_filled(&self) -> bool {
        match self {
            Scalar::Text(s) => !s.trim().is_empty(),
            _ => true,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Value of one status field: either a scalar or a composite of named subfields
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Option<Scalar>),
    Composite(Vec<(&'static str, Option<Scalar>)>),
}

impl FieldValue {
    pub fn is_filled(&self) -> bool {
        match self {
            FieldValue::Scalar(value) => is_filled(value.as_ref()),
            FieldValue::Composite(subfields) => !subfields.is_empty(),
        }
    }

    /// Subfield value, `None` for scalars and unknown subfields
    pub fn subfield(&self, name: &str) -> Option<&Scalar> {
        match self {
            FieldValue::Composite(subfields) => subfields
                .iter()
                .find(|(sub, _)| *sub == name)
                .and_then(|(_, value)| value.as_ref()),
            FieldValue::Scalar(_) => None,
        }
    }
}

pub fn is_filled(value: Option<&Scalar>) -> bool {
    value.map(Scalar::is_filled).unwrap_or(false)
}

/// Structured UPS status produced from raw telemetry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Status {
    /// Fields in declaration order
    pub values: Vec<(&'static str, FieldValue)>,
    /// Capability names derived from the filled values, same order as `values`
    pub capabilities: Vec<String>,
}

impl Status {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }

    pub fn has_filled(&self, field: &str) -> bool {
        self.get(field).map(FieldValue::is_filled).unwrap_or(false)
    }

    /// Scalar field value if present
    pub fn scalar(&self, field: &str) -> Option<&Scalar> {
        match self.get(field)? {
            FieldValue::Scalar(value) => value.as_ref(),
            FieldValue::Composite(_) => None,
        }
    }

    /// Resolve a capability name (`field` or `field.subfield`) to its filled value
    pub fn resolve(&self, capability: &str) -> Option<&Scalar> {
        let value = match capability.split_once('.') {
            Some((field, rest)) => {
                let subfield = rest.rsplit('.').next().unwrap_or(rest);
                self.get(field)?.subfield(subfield)
            }
            None => self.scalar(capability),
        };
        value.filter(|v| v.is_filled())
    }
}

// ============================================================================
// Persisted Capability State
// ============================================================================

/// Store keys owned by the reconciler
pub const STORE_FIRST_RUN: &str = "first_run";
pub const STORE_CAPABILITIES: &str = "capabilities";

/// Store key holding the capability list the host currently exposes
pub const STORE_EXPOSED_CAPABILITIES: &str = "exposed_capabilities";

/// Capability history persisted per device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCapabilityState {
    pub first_run: Option<bool>,
    pub capabilities: Option<Vec<String>>,
}

impl PersistedCapabilityState {
    /// Unset counts as "first run still pending"
    pub fn needs_first_run(&self) -> bool {
        self.first_run.unwrap_or(true)
    }

    pub fn known_capabilities(&self) -> &[String] {
        self.capabilities.as_deref().unwrap_or(&[])
    }
}

// ============================================================================
// Device Models
// ============================================================================

/// Settings of one UPS device, editable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// UPS name on the server (`LIST VAR <ups_name>`)
    pub ups_name: String,
    /// Poll interval in seconds
    pub interval: u64,
    /// Deadline for connect, authenticate and fetch, in seconds
    pub timeout: u64,
}

/// Device identity as shown to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Availability {
    Available { since: DateTime<Utc> },
    Unavailable { reason: String, since: DateTime<Utc> },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available { .. })
    }
}
