//! NUT variables → structured UPS status
//!
//! Field order here is the order capabilities are listed in, so keep it stable.

use crate::models::{FieldValue, RawTelemetry, Scalar, Status};

/// Fields that describe the device rather than a capability
const IDENTITY_FIELDS: [&str; 2] = ["name", "id"];

/// Status flags reported in `ups.status`
const STATUS_FLAGS: &[(&str, &str)] = &[
    ("OL", "Online"),
    ("OB", "On Battery"),
    ("LB", "Low Battery"),
    ("HB", "High Battery"),
    ("RB", "Battery Needs Replaced"),
    ("CHRG", "Battery Charging"),
    ("DISCHRG", "Battery Discharging"),
    ("BYPASS", "Bypass Active"),
    ("CAL", "Runtime Calibration"),
    ("OFF", "Offline"),
    ("OVER", "Overloaded"),
    ("TRIM", "Trimming Input Voltage"),
    ("BOOST", "Boosting Input Voltage"),
    ("FSD", "Forced Shutdown"),
    ("ALARM", "Alarm"),
];

/// Human readable label for a status flag
pub fn flag_label(token: &str) -> Option<&'static str> {
    STATUS_FLAGS
        .iter()
        .find(|(flag, _)| *flag == token)
        .map(|(_, label)| *label)
}

/// Translate raw variables into a [`Status`]. Never fails: missing or
/// unparsable variables become `None`.
pub fn translate(raw: &RawTelemetry) -> Status {
    let raw_status = text(raw, "ups.status");

    let mut values: Vec<(&'static str, FieldValue)> = vec![
        (
            "name",
            FieldValue::Scalar(text(raw, "ups.model").map(|s| Scalar::Text(s.to_string()))),
        ),
        (
            "id",
            FieldValue::Scalar(text(raw, "ups.serial").map(|s| Scalar::Text(s.to_string()))),
        ),
        ("measure_battery", FieldValue::Scalar(int(raw, "battery.charge"))),
        (
            "measure_battery_runtime",
            FieldValue::Scalar(int(raw, "battery.runtime")),
        ),
        (
            "measure_temperature",
            FieldValue::Scalar(float(raw, "battery.temperature")),
        ),
        (
            "measure_voltage",
            FieldValue::Composite(vec![
                ("input", int(raw, "input.voltage")),
                ("output", int(raw, "output.voltage")),
            ]),
        ),
        (
            "status",
            FieldValue::Scalar(raw_status.map(|s| Scalar::Text(readable_status(s)))),
        ),
        (
            "alarm_status",
            FieldValue::Scalar(Some(Scalar::Bool(raw_status.map(is_alarm).unwrap_or(false)))),
        ),
    ];

    // Only present when reported, so they can be added to the device later
    if let Some(load) = int(raw, "ups.load") {
        values.push(("measure_load", FieldValue::Scalar(Some(load))));
    }
    if let Some(voltage) = float(raw, "battery.voltage") {
        values.push(("measure_battery_voltage", FieldValue::Scalar(Some(voltage))));
    }

    let capabilities = capability_names(&values);
    Status {
        values,
        capabilities,
    }
}

/// `"OL CHRG"` → `"Online, Battery Charging"`. Unknown flags are kept verbatim.
pub fn readable_status(raw: &str) -> String {
    raw.split(' ')
        .filter(|token| !token.is_empty())
        .map(|token| flag_label(token).unwrap_or(token))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Anything but a leading `OL` flag raises the alarm
pub fn is_alarm(raw: &str) -> bool {
    raw.split(' ').next() != Some("OL")
}

fn capability_names(values: &[(&'static str, FieldValue)]) -> Vec<String> {
    let mut names = Vec::new();

    for (field, value) in values {
        if IDENTITY_FIELDS.contains(field) {
            continue;
        }
        match value {
            FieldValue::Composite(subfields) => {
                for (sub, sub_value) in subfields {
                    if crate::models::is_filled(sub_value.as_ref()) {
                        names.push(format!("{}.{}", field, sub));
                    }
                }
            }
            FieldValue::Scalar(_) => {
                if value.is_filled() {
                    names.push(field.to_string());
                }
            }
        }
    }

    names
}

fn text<'a>(raw: &'a RawTelemetry, key: &str) -> Option<&'a str> {
    raw.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Integer parse; decimals such as `"230.4"` are truncated
fn int(raw: &RawTelemetry, key: &str) -> Option<Scalar> {
    let value = text(raw, key)?;
    value
        .parse::<i64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
        .map(Scalar::Int)
}

fn float(raw: &RawTelemetry, key: &str) -> Option<Scalar> {
    text(raw, key)?
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Scalar::Float)
}
