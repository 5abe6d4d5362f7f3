//! Capability reconciliation
//!
//! Runs after every successful read:
//! 1. Add optional capabilities the UPS turned out to report
//! 2. On the first successful read only, remove capabilities the UPS does not report
//! 3. Merge the status capabilities into the persisted set
//! 4. Push values for every known capability

use serde_json::json;

use super::load_state;
use crate::error::UpsError;
use crate::host::{DeviceCapabilities, DeviceStore};
use crate::models::{Status, STORE_CAPABILITIES, STORE_FIRST_RUN};

/// Capabilities not in the default set, added once a UPS reports them
pub const DYNAMIC_CAPABILITIES: [&str; 2] = ["measure_load", "measure_battery_voltage"];

/// What one reconciliation changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub first_run_completed: bool,
    pub capabilities_changed: bool,
    pub written: usize,
    pub failed_writes: Vec<String>,
}

pub async fn reconcile(
    status: &Status,
    store: &dyn DeviceStore,
    device: &dyn DeviceCapabilities,
) -> Result<ReconcileReport, UpsError> {
    let mut report = ReconcileReport::default();
    let state = load_state(store).await?;

    // 1. Dynamic discovery, checked against the live device
    for name in DYNAMIC_CAPABILITIES {
        if status.has_filled(name) && !device.has_capability(name).await {
            device.add_capability(name).await?;
            tracing::info!("[Reconcile] Added capability {}", name);
            report.added.push(name.to_string());
        }
    }

    let known = state.known_capabilities();

    // 2. First-run pruning
    if state.needs_first_run() {
        for name in device.capabilities().await {
            let reported = known.contains(&name) || status.capabilities.contains(&name);
            if !reported {
                device.remove_capability(&name).await?;
                tracing::info!("[Reconcile] Removed unsupported capability {}", name);
                report.removed.push(name);
            }
        }
        store.set(STORE_FIRST_RUN, json!(false)).await?;
        report.first_run_completed = true;
    }

    // 3. Merge
    let merged = merge_capabilities(known, &status.capabilities);
    if state.capabilities.as_deref() != Some(merged.as_slice()) {
        store.set(STORE_CAPABILITIES, json!(merged)).await?;
        report.capabilities_changed = true;
    }

    // 4. Values. Capabilities without a current value keep their last one.
    let effective = if merged.is_empty() {
        &status.capabilities
    } else {
        &merged
    };
    for name in effective {
        let Some(value) = status.resolve(name) else {
            if let Some(last) = device.capability_value(name).await {
                tracing::debug!("[Reconcile] {} not reported, keeping {}", name, last);
            }
            continue;
        };
        match device.set_capability_value(name, value.clone()).await {
            Ok(()) => report.written += 1,
            Err(e) => {
                tracing::warn!("[Reconcile] {}", e);
                report.failed_writes.push(name.clone());
            }
        }
    }

    tracing::debug!(
        "[Reconcile] added={:?} removed={:?} written={} failed={}",
        report.added,
        report.removed,
        report.written,
        report.failed_writes.len()
    );

    Ok(report)
}

/// Union of `known` and `current`, keeping first-seen order
pub fn merge_capabilities(known: &[String], current: &[String]) -> Vec<String> {
    if known.is_empty() {
        return current.to_vec();
    }

    let mut merged = known.to_vec();
    for name in current {
        if !merged.contains(name) {
            merged.push(name.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;
    use crate::models::{FieldValue, Scalar};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Capability API double recording every call
    #[derive(Default)]
    struct MockDevice {
        caps: Mutex<Vec<String>>,
        values: Mutex<HashMap<String, Scalar>>,
        rejected: Vec<String>,
        adds: Mutex<Vec<String>>,
        removes: Mutex<Vec<String>>,
    }

    impl MockDevice {
        fn exposing(caps: &[&str]) -> Self {
            Self {
                caps: Mutex::new(caps.iter().map(|c| c.to_string()).collect()),
                ..Default::default()
            }
        }

        fn caps(&self) -> Vec<String> {
            self.caps.lock().unwrap().clone()
        }

        fn value(&self, name: &str) -> Option<Scalar> {
            self.values.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl DeviceCapabilities for MockDevice {
        async fn has_capability(&self, name: &str) -> bool {
            self.caps.lock().unwrap().iter().any(|c| c == name)
        }

        async fn add_capability(&self, name: &str) -> Result<(), UpsError> {
            self.adds.lock().unwrap().push(name.to_string());
            self.caps.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn remove_capability(&self, name: &str) -> Result<(), UpsError> {
            self.removes.lock().unwrap().push(name.to_string());
            self.caps.lock().unwrap().retain(|c| c != name);
            Ok(())
        }

        async fn capabilities(&self) -> Vec<String> {
            self.caps()
        }

        async fn capability_value(&self, name: &str) -> Option<Scalar> {
            self.value(name)
        }

        async fn set_capability_value(&self, name: &str, value: Scalar) -> Result<(), UpsError> {
            if self.rejected.iter().any(|r| r == name) {
                return Err(UpsError::CapabilityWrite {
                    capability: name.to_string(),
                    reason: "rejected".to_string(),
                });
            }
            self.values.lock().unwrap().insert(name.to_string(), value);
            Ok(())
        }

        async fn set_available(&self) {}

        async fn set_unavailable(&self, _reason: &str) {}
    }

    fn status(values: Vec<(&'static str, FieldValue)>) -> Status {
        let capabilities = values
            .iter()
            .flat_map(|(field, value)| match value {
                FieldValue::Composite(subs) => subs
                    .iter()
                    .filter(|(_, v)| v.is_some())
                    .map(|(sub, _)| format!("{}.{}", field, sub))
                    .collect::<Vec<_>>(),
                FieldValue::Scalar(Some(_)) => vec![field.to_string()],
                FieldValue::Scalar(None) => vec![],
            })
            .collect();
        Status {
            values,
            capabilities,
        }
    }

    fn int(v: i64) -> FieldValue {
        FieldValue::Scalar(Some(Scalar::Int(v)))
    }

    fn basic_status() -> Status {
        status(vec![
            ("measure_battery", int(95)),
            (
                "measure_voltage",
                FieldValue::Composite(vec![("input", Some(Scalar::Int(230))), ("output", None)]),
            ),
        ])
    }

    async fn seeded_store(first_run: Option<bool>, caps: Option<&[&str]>) -> MemoryStore {
        let store = MemoryStore::new();
        if let Some(first_run) = first_run {
            store.set(STORE_FIRST_RUN, json!(first_run)).await.unwrap();
        }
        if let Some(caps) = caps {
            store.set(STORE_CAPABILITIES, json!(caps)).await.unwrap();
        }
        store
    }

    #[test]
    fn test_merge_capabilities() {
        let known = vec!["measure_battery".to_string()];
        let current = vec!["measure_battery".to_string(), "measure_load".to_string()];
        assert_eq!(
            merge_capabilities(&known, &current),
            vec!["measure_battery", "measure_load"]
        );
        assert_eq!(merge_capabilities(&[], &current), current);
        assert_eq!(merge_capabilities(&known, &[]), known);
    }

    #[tokio::test]
    async fn test_first_run_pruning() {
        let device = MockDevice::exposing(&["measure_battery", "measure_voltage.input", "foo"]);
        let store = seeded_store(
            Some(true),
            Some(&["measure_battery", "measure_voltage.input"]),
        )
        .await;

        let report = reconcile(&basic_status(), &store, &device).await.unwrap();

        assert_eq!(report.removed, vec!["foo"]);
        assert_eq!(*device.removes.lock().unwrap(), vec!["foo".to_string()]);
        assert!(report.first_run_completed);
        assert_eq!(device.caps(), vec!["measure_battery", "measure_voltage.input"]);
        assert_eq!(store.get(STORE_FIRST_RUN).await.unwrap(), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_unset_first_run_prunes_against_current_status() {
        let device = MockDevice::exposing(&[
            "measure_battery",
            "measure_temperature",
            "measure_voltage.input",
            "measure_voltage.output",
        ]);
        let store = MemoryStore::new();

        let report = reconcile(&basic_status(), &store, &device).await.unwrap();

        assert_eq!(
            report.removed,
            vec!["measure_temperature", "measure_voltage.output"]
        );
        assert_eq!(device.caps(), vec!["measure_battery", "measure_voltage.input"]);
        assert_eq!(
            store.get(STORE_CAPABILITIES).await.unwrap(),
            Some(json!(["measure_battery", "measure_voltage.input"]))
        );
        assert_eq!(device.value("measure_battery"), Some(Scalar::Int(95)));
        assert_eq!(device.value("measure_voltage.input"), Some(Scalar::Int(230)));
    }

    #[tokio::test]
    async fn test_no_pruning_after_first_run() {
        let device = MockDevice::exposing(&["measure_battery", "foo"]);
        let store = seeded_store(Some(false), Some(&["measure_battery"])).await;

        let report = reconcile(&basic_status(), &store, &device).await.unwrap();

        assert!(report.removed.is_empty());
        assert!(!report.first_run_completed);
        assert!(device.caps().contains(&"foo".to_string()));
    }

    #[tokio::test]
    async fn test_dynamic_capability_added() {
        let device = MockDevice::exposing(&["measure_battery"]);
        let store = seeded_store(Some(false), Some(&["measure_battery"])).await;
        let status = status(vec![
            ("measure_battery", int(80)),
            ("measure_load", int(0)),
            (
                "measure_battery_voltage",
                FieldValue::Scalar(Some(Scalar::Float(13.5))),
            ),
        ]);

        let report = reconcile(&status, &store, &device).await.unwrap();

        assert_eq!(report.added, vec!["measure_load", "measure_battery_voltage"]);
        assert_eq!(device.value("measure_load"), Some(Scalar::Int(0)));
        assert_eq!(
            device.value("measure_battery_voltage"),
            Some(Scalar::Float(13.5))
        );
    }

    #[tokio::test]
    async fn test_union_merge() {
        let device = MockDevice::exposing(&["measure_battery"]);
        let store = seeded_store(Some(false), Some(&["measure_battery"])).await;
        let status = status(vec![("measure_battery", int(80)), ("measure_load", int(20))]);

        let report = reconcile(&status, &store, &device).await.unwrap();

        assert!(report.capabilities_changed);
        assert_eq!(
            store.get(STORE_CAPABILITIES).await.unwrap(),
            Some(json!(["measure_battery", "measure_load"]))
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let device = MockDevice::exposing(&["measure_battery", "measure_voltage.input"]);
        let store = MemoryStore::new();
        let status = basic_status();

        reconcile(&status, &store, &device).await.unwrap();
        let saved = store.get(STORE_CAPABILITIES).await.unwrap();

        let second = reconcile(&status, &store, &device).await.unwrap();

        assert!(second.added.is_empty());
        assert!(second.removed.is_empty());
        assert!(!second.capabilities_changed);
        assert!(second.failed_writes.is_empty());
        assert!(device.adds.lock().unwrap().is_empty());
        assert_eq!(store.get(STORE_CAPABILITIES).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent_with_dynamic_capability() {
        let device = MockDevice::exposing(&["measure_battery", "measure_load"]);
        let store = seeded_store(Some(false), Some(&["measure_battery", "measure_load"])).await;
        let status = status(vec![("measure_battery", int(90)), ("measure_load", int(25))]);

        let first = reconcile(&status, &store, &device).await.unwrap();
        let second = reconcile(&status, &store, &device).await.unwrap();

        for report in [&first, &second] {
            assert!(report.added.is_empty());
            assert!(report.removed.is_empty());
            assert!(!report.capabilities_changed);
            assert!(report.failed_writes.is_empty());
        }
        assert!(device.adds.lock().unwrap().is_empty());
        assert_eq!(device.caps(), vec!["measure_battery", "measure_load"]);
        assert_eq!(device.value("measure_load"), Some(Scalar::Int(25)));
        assert_eq!(
            store.get(STORE_CAPABILITIES).await.unwrap(),
            Some(json!(["measure_battery", "measure_load"]))
        );
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_other_writes() {
        let device = MockDevice {
            rejected: vec!["measure_battery".to_string()],
            ..MockDevice::exposing(&["measure_battery", "measure_voltage.input"])
        };
        let store = seeded_store(Some(false), None).await;

        let report = reconcile(&basic_status(), &store, &device).await.unwrap();

        assert_eq!(report.failed_writes, vec!["measure_battery"]);
        assert_eq!(report.written, 1);
        assert_eq!(device.value("measure_voltage.input"), Some(Scalar::Int(230)));
    }

    #[tokio::test]
    async fn test_stale_capability_keeps_last_value() {
        let device = MockDevice::exposing(&["measure_battery", "measure_load"]);
        device
            .values
            .lock()
            .unwrap()
            .insert("measure_load".to_string(), Scalar::Int(33));
        let store = seeded_store(Some(false), Some(&["measure_battery", "measure_load"])).await;

        let status = status(vec![("measure_battery", int(70))]);
        let report = reconcile(&status, &store, &device).await.unwrap();

        assert_eq!(report.written, 1);
        assert!(report.failed_writes.is_empty());
        assert_eq!(device.value("measure_load"), Some(Scalar::Int(33)));
        assert_eq!(
            store.get(STORE_CAPABILITIES).await.unwrap(),
            Some(json!(["measure_battery", "measure_load"]))
        );
    }
}
