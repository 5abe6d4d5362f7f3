//! Device discovery for pairing
//!
//! Lists every UPS on a server and reads its model and serial so the host
//! can offer them as new devices.

use crate::error::UpsError;
use crate::models::{DeviceSettings, Scalar, Status};
use crate::nut::{translate, UpsClient, UpsConnector};

use super::poller::with_deadline;

/// A UPS found on the server
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DiscoveredDevice {
    pub ups_name: String,
    pub name: String,
    pub id: String,
}

/// Connect with `settings` and describe every UPS the server reports
pub async fn discover_devices(
    connector: &dyn UpsConnector,
    settings: &DeviceSettings,
) -> Result<Vec<DiscoveredDevice>, UpsError> {
    let mut client = connector.client(settings);
    let result = list_and_describe(client.as_mut(), settings).await;
    client.close().await;

    if let Ok(devices) = &result {
        tracing::info!(
            "[Pairing] Found {} UPS on {}:{}",
            devices.len(),
            settings.ip,
            settings.port
        );
    }
    result
}

async fn list_and_describe(
    client: &mut dyn UpsClient,
    settings: &DeviceSettings,
) -> Result<Vec<DiscoveredDevice>, UpsError> {
    with_deadline("connecting", settings.timeout, client.connect()).await?;
    with_deadline(
        "authenticating",
        settings.timeout,
        client.authenticate(&settings.username, &settings.password),
    )
    .await?;
    let entries = with_deadline("listing devices", settings.timeout, client.list_devices()).await?;

    let mut devices = Vec::with_capacity(entries.len());
    for entry in entries {
        let raw = with_deadline(
            "fetching variables",
            settings.timeout,
            client.fetch_variables(&entry.name),
        )
        .await?;
        let status = translate(&raw);

        devices.push(DiscoveredDevice {
            name: text_field(&status, "name").unwrap_or_else(|| entry.name.clone()),
            id: text_field(&status, "id").unwrap_or_else(|| entry.name.clone()),
            ups_name: entry.name,
        });
    }

    Ok(devices)
}

fn text_field(status: &Status, field: &str) -> Option<String> {
    match status.scalar(field)? {
        Scalar::Text(s) => Some(s.clone()),
        _ => None,
    }
}
