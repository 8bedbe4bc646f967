//! Simulated driver with no external I/O

use async_trait::async_trait;
use iotbridge_core::{Device, DeviceId, StateMap};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::info;

use crate::driver::{DeviceDriver, DriverError};

/// Value checks applied to well-known keys
enum KeyRule {
    OneOf(&'static [&'static str]),
    Integer,
    Any,
}

fn builtin_rule(key: &str) -> Option<KeyRule> {
    match key.to_lowercase().as_str() {
        "power" | "state" => Some(KeyRule::OneOf(&["on", "off"])),
        "brightness" | "level" => Some(KeyRule::Integer),
        "color" | "rgb" => Some(KeyRule::Any),
        _ => None,
    }
}

/// A key is known to a device if it names a capability or a declared parameter
fn declared_by(device: &Device, key: &str) -> bool {
    device
        .capabilities
        .iter()
        .any(|c| c.name == key || c.parameters.contains_key(key))
}

/// Accepted commands kept in the journal
pub const JOURNAL_CAPACITY: usize = 128;

/// Driver that pretends to talk to hardware.
///
/// `get_state` echoes the stored state. `set_state` applies light checks and
/// journals the most recent accepted commands so they can be inspected.
#[derive(Debug, Default)]
pub struct MockDriver {
    commands: Mutex<VecDeque<(DeviceId, StateMap)>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Up to [`JOURNAL_CAPACITY`] accepted commands, oldest first
    pub async fn commands(&self) -> Vec<(DeviceId, StateMap)> {
        self.commands.lock().await.iter().cloned().collect()
    }

    fn check(device: &Device, key: &str, value: &str) -> Result<(), DriverError> {
        let invalid = || DriverError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match builtin_rule(key) {
            Some(KeyRule::OneOf(allowed)) if !allowed.contains(&value) => Err(invalid()),
            Some(KeyRule::Integer) if value.parse::<i64>().is_err() => Err(invalid()),
            Some(_) => Ok(()),
            None if declared_by(device, key) => Ok(()),
            None => Err(DriverError::UnsupportedCapability(key.to_string())),
        }
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError> {
        Ok(device.state.clone())
    }

    async fn set_state(&self, device: &Device, updates: &StateMap) -> Result<(), DriverError> {
        for (key, value) in updates {
            Self::check(device, key, value)?;
        }

        for (key, value) in updates {
            info!(device = %device.id, key = %key, value = %value, "Simulated set");
        }
        let mut commands = self.commands.lock().await;
        if commands.len() == JOURNAL_CAPACITY {
            commands.pop_front();
        }
        commands.push_back((device.id.clone(), updates.clone()));
        Ok(())
    }
}
