//! Device types for tracking registered hardware

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::capability::Capability;

/// Canonical device state: capability/parameter name to canonical string value
pub type StateMap = BTreeMap<String, String>;

/// Unique identifier for a device, assigned at registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A registered device in the IoT Bridge system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier
    pub id: DeviceId,
    /// Human-readable name (can be user-assigned)
    #[serde(default)]
    pub name: String,
    /// Device type (e.g., "bulb", "smart_plug")
    #[serde(rename = "type", default)]
    pub device_type: String,
    /// Protocol used to reach the device; selects the driver
    #[serde(default)]
    pub protocol: String,
    /// Room the device is placed in
    #[serde(default)]
    pub room: String,
    /// Last known or last applied state
    #[serde(default)]
    pub state: StateMap,
    /// Capabilities exposed by the device, names unique within the device
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Device {
    /// Create a new device with empty state and no capabilities
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        device_type: impl Into<String>,
        protocol: impl Into<String>,
        room: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            device_type: device_type.into(),
            protocol: protocol.into(),
            room: room.into(),
            state: StateMap::new(),
            capabilities: Vec::new(),
        }
    }

    /// Find a capability by name
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Merge updates into the state, leaving untouched keys intact
    pub fn merge_state(&mut self, updates: &StateMap) {
        for (key, value) in updates {
            self.state.insert(key.clone(), value.clone());
        }
    }

    /// Replace the capability list wholesale.
    ///
    /// Later entries with a duplicate name are dropped so names stay unique.
    pub fn replace_capabilities(&mut self, capabilities: Vec<Capability>) {
        let mut unique: Vec<Capability> = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            if unique.iter().any(|c| c.name == capability.name) {
                tracing::warn!(
                    device = %self.id,
                    capability = %capability.name,
                    "Dropping duplicate capability"
                );
                continue;
            }
            unique.push(capability);
        }
        self.capabilities = unique;
    }

    /// Apply a metadata patch; empty fields are ignored
    pub fn apply_patch(&mut self, patch: &DevicePatch) {
        if let Some(name) = patch.name.as_deref().filter(|n| !n.is_empty()) {
            self.name = name.to_string();
        }
        if let Some(room) = patch.room.as_deref().filter(|r| !r.is_empty()) {
            self.room = room.to_string();
        }
    }
}

/// Metadata patch for a registered device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

/// A device reported by a scan but not yet registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub protocol: String,
    /// Received signal strength in dBm
    #[serde(rename = "signal_strength")]
    pub signal: i32,
}

impl DiscoveredDevice {
    /// Convert into a device record with empty state and no capabilities
    pub fn into_device(self, name: impl Into<String>, room: impl Into<String>) -> Device {
        Device::new(self.id, name, self.device_type, self.protocol, room)
    }
}
