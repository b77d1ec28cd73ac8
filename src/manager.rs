//! Discovery of the receivers served by a daemon.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{ControllerConfig, BASE_CONTROL_PORT, DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_HOST};
use crate::control::{ControlChannel, ControlRequest};
use crate::controller::DeviceController;
use crate::error::{Error, Result};

/// Manager entry that describes the manager itself rather than a device.
const MANAGER_KEY: &str = "dm";
const UNKNOWN: &str = "UNKNOWN";

/// A receiver reported by the device manager.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Key of the entry in the manager response.
    pub id: String,
    pub device_number: u16,
    pub address: String,
    pub serial_number: String,
    pub model: String,
    pub device_type: String,
}

impl DeviceInfo {
    fn from_entry(id: &str, entry: &Map<String, Value>) -> Option<Self> {
        let device_number = entry.get("dn").and_then(|dn| match dn {
            Value::Number(num) => num.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })?;
        Some(DeviceInfo {
            id: id.to_string(),
            device_number,
            address: text(entry, "addr"),
            serial_number: text(entry, "sn"),
            model: text(entry, "model"),
            device_type: text(entry, "type"),
        })
    }
}

fn text(entry: &Map<String, Value>, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => UNKNOWN.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Decode the manager's device mapping, skipping the manager entry and any entry without a
/// usable device number. Devices are ordered by device number.
#[must_use]
pub fn parse_devices(devices: &Map<String, Value>) -> Vec<DeviceInfo> {
    let mut infos: Vec<DeviceInfo> = devices
        .iter()
        .filter(|(id, _)| id.as_str() != MANAGER_KEY)
        .filter_map(|(id, entry)| {
            let info = entry
                .as_object()
                .and_then(|entry| DeviceInfo::from_entry(id, entry));
            if info.is_none() {
                warn!(id = %id, "skipping device entry without a device number");
            }
            info
        })
        .collect();
    infos.sort_by_key(|info| info.device_number);
    infos
}

/// Client for the daemon's device manager port.
pub struct DeviceManager {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Default for DeviceManager {
    fn default() -> Self {
        DeviceManager::new(DEFAULT_HOST, BASE_CONTROL_PORT)
    }
}

impl DeviceManager {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DeviceManager {
            host: host.into(),
            port,
            timeout: Duration::from_millis(DEFAULT_CONTROL_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// List the devices known to the manager. A manager answering `false` has no devices.
    ///
    /// # Errors
    /// Any control channel error, or [Error::MalformedResponse] if the device list is not a
    /// mapping.
    pub fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut control = ControlChannel::new(self.host.clone(), self.port, self.timeout);
        let response = control.send(&ControlRequest::Enumerate)?;
        control.disconnect();
        if !response.success {
            info!(port = self.port, "device manager reports no devices");
            return Ok(Vec::new());
        }
        let devices = match response.payload {
            Some(Value::Object(devices)) => parse_devices(&devices),
            None => Vec::new(),
            Some(other) => {
                return Err(Error::MalformedResponse(format!(
                    "expected a device mapping, got {other}"
                )));
            }
        };
        debug!(count = devices.len(), "enumerated devices");
        Ok(devices)
    }

    /// Build a controller for every device the manager reports, using default settings.
    ///
    /// # Errors
    /// As [Self::enumerate], or [Error::Configuration] if a device number is out of range.
    pub fn controllers(&self) -> Result<Vec<DeviceController>> {
        self.enumerate()?
            .into_iter()
            .map(|info| {
                DeviceController::new(
                    ControllerConfig::builder()
                        .device_number(info.device_number)
                        .host(self.host.clone())
                        .build(),
                )
            })
            .collect()
    }
}
