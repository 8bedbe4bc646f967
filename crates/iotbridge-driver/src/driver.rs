//! The protocol driver contract

use async_trait::async_trait;
use iotbridge_core::{Device, DeviceId, StateMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),
    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
    #[error("No state available for device {0}")]
    NoStateAvailable(DeviceId),
    #[error("No driver for protocol: {0}")]
    UnknownProtocol(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Executes commands against (real or simulated) hardware
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Last state the driver knows for the device
    async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError>;

    /// Apply canonical updates to the device
    async fn set_state(&self, device: &Device, updates: &StateMap) -> Result<(), DriverError>;
}
