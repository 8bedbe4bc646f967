//! Protocol to driver lookup

use iotbridge_core::Device;
use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{DeviceDriver, DriverError};

/// Maps a device's `protocol` to the driver that speaks it
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, replacing any previous one for the protocol
    pub fn register(&mut self, protocol: impl Into<String>, driver: Arc<dyn DeviceDriver>) {
        self.drivers.insert(protocol.into(), driver);
    }

    pub fn with(mut self, protocol: impl Into<String>, driver: Arc<dyn DeviceDriver>) -> Self {
        self.register(protocol, driver);
        self
    }

    pub fn for_protocol(&self, protocol: &str) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        self.drivers
            .get(protocol)
            .cloned()
            .ok_or_else(|| DriverError::UnknownProtocol(protocol.to_string()))
    }

    pub fn driver_for(&self, device: &Device) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        self.for_protocol(&device.protocol)
    }

    pub fn supports(&self, protocol: &str) -> bool {
        self.drivers.contains_key(protocol)
    }

    /// Registered protocol names, sorted
    pub fn protocols(&self) -> Vec<&str> {
        let mut protocols: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        protocols.sort_unstable();
        protocols
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use iotbridge_core::DeviceId;

    #[test]
    fn test_lookup_by_protocol() {
        let registry = DriverRegistry::new().with("mock", Arc::new(MockDriver::new()));
        let device = Device::new(DeviceId::new("d1"), "D", "switch", "mock", "hall");
        assert_eq!(registry.driver_for(&device).unwrap().name(), "mock");
        assert!(registry.supports("mock"));
    }

    #[test]
    fn test_unknown_protocol_fails() {
        let registry = DriverRegistry::new().with("mock", Arc::new(MockDriver::new()));
        let err = registry.for_protocol("zwave").err().unwrap();
        assert!(matches!(err, DriverError::UnknownProtocol(ref p) if p == "zwave"));
    }

    #[test]
    fn test_protocols_sorted() {
        let mock: Arc<dyn DeviceDriver> = Arc::new(MockDriver::new());
        let registry = DriverRegistry::new()
            .with("zwave", mock.clone())
            .with("mock", mock);
        assert_eq!(registry.protocols(), vec!["mock", "zwave"]);
    }
}
