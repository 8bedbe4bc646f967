//! Application state management

use anyhow::{bail, Result};
use iotbridge_core::{
    capabilities_for_type, Capability, Device, DeviceId, DevicePatch, DeviceStore,
    KeywordInference, StoreError,
};
use iotbridge_driver::{
    DeviceDriver, DriverRegistry, MockDriver, MqttTransport, TopicScheme, ZigbeeDriver,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, DriverKind};
use crate::invoke::Coordinator;
use crate::scan::Scanner;

/// Failures of device management requests
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(DeviceId),
    #[error("Device {0} not found in scan results")]
    NotDiscovered(DeviceId),
    #[error("Invalid device: {0}")]
    Invalid(String),
    #[error("No driver for protocol: {0}")]
    UnknownProtocol(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Device records
    pub store: Arc<dyn DeviceStore>,
    /// Protocol drivers
    pub drivers: Arc<DriverRegistry>,
    /// Capability invocation pipeline
    pub coordinator: Coordinator,
    /// Results of the last discovery scan
    pub scanner: Scanner,
    /// Stops background tasks (listeners, MQTT event loop)
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store = iotbridge_store::open(config.store.backend, &config.store.path)?;
        info!(backend = ?config.store.backend, "Device store ready");

        let shutdown = CancellationToken::new();
        let drivers = build_drivers(&config, store.clone(), &shutdown)?;

        Ok(Self::from_parts(config, store, drivers, shutdown))
    }

    /// Assemble state from already-built components
    pub fn from_parts(
        config: Config,
        store: Arc<dyn DeviceStore>,
        drivers: DriverRegistry,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let drivers = Arc::new(drivers);
        let coordinator = Coordinator::new(store.clone(), drivers.clone());
        Arc::new(Self {
            config,
            store,
            drivers,
            coordinator,
            scanner: Scanner::new(),
            shutdown,
        })
    }

    /// All devices, ordered by id
    pub async fn devices(&self) -> Result<Vec<Device>, DeviceError> {
        let mut devices = self.store.get_all().await?;
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    pub async fn device(&self, id: &DeviceId) -> Result<Device, DeviceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }

    /// Stored device with the driver's last known state laid over it
    pub async fn device_with_live_state(&self, id: &DeviceId) -> Result<Device, DeviceError> {
        let mut device = self.device(id).await?;
        if let Ok(driver) = self.drivers.driver_for(&device) {
            match driver.get_state(&device).await {
                Ok(state) => device.merge_state(&state),
                Err(e) => debug!(device = %id, error = %e, "No live state"),
            }
        }
        Ok(device)
    }

    /// Add or replace a device.
    ///
    /// A device registered without capabilities gets the defaults for its
    /// type.
    pub async fn register_device(&self, mut device: Device) -> Result<Device, DeviceError> {
        if device.id.is_empty() {
            return Err(DeviceError::Invalid("missing id".to_string()));
        }
        if !self.drivers.supports(&device.protocol) {
            return Err(DeviceError::UnknownProtocol(device.protocol));
        }

        let capabilities = if device.capabilities.is_empty() {
            capabilities_for_type(&device.device_type)
        } else {
            std::mem::take(&mut device.capabilities)
        };
        device.replace_capabilities(capabilities);

        self.store.add(device.clone()).await?;
        info!(
            device = %device.id,
            protocol = %device.protocol,
            capabilities = device.capabilities.len(),
            "Registered device"
        );
        Ok(device)
    }

    /// Register a device found by the last scan under a chosen name and room
    pub async fn register_from_scan(
        &self,
        id: &DeviceId,
        name: &str,
        room: &str,
    ) -> Result<Device, DeviceError> {
        if id.is_empty() || name.is_empty() || room.is_empty() {
            return Err(DeviceError::Invalid(
                "id, name and room are required".to_string(),
            ));
        }
        let found = self
            .scanner
            .find(id)
            .await
            .ok_or_else(|| DeviceError::NotDiscovered(id.clone()))?;
        self.register_device(found.into_device(name, room)).await
    }

    pub async fn patch_device(
        &self,
        id: &DeviceId,
        patch: &DevicePatch,
    ) -> Result<Device, DeviceError> {
        self.store
            .update_metadata(id, patch)
            .await?
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }

    pub async fn replace_capabilities(
        &self,
        id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<Device, DeviceError> {
        self.store
            .set_capabilities(id, capabilities)
            .await?
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }

    pub async fn delete_device(&self, id: &DeviceId) -> Result<(), DeviceError> {
        self.device(id).await?;
        self.store.delete(id).await?;
        info!(device = %id, "Deleted device");
        Ok(())
    }
}

/// Instantiate the configured drivers; one zigbee driver is shared by every
/// protocol mapped to it
fn build_drivers(
    config: &Config,
    store: Arc<dyn DeviceStore>,
    shutdown: &CancellationToken,
) -> Result<DriverRegistry> {
    let mock: Arc<dyn DeviceDriver> = Arc::new(MockDriver::new());
    let mut zigbee: Option<Arc<dyn DeviceDriver>> = None;
    let mut registry = DriverRegistry::new();

    for (protocol, kind) in &config.drivers {
        let driver = match kind {
            DriverKind::Mock => mock.clone(),
            DriverKind::Zigbee => {
                if let Some(driver) = &zigbee {
                    driver.clone()
                } else {
                    if !config.mqtt.enabled {
                        bail!(
                            "protocol '{}' uses the zigbee driver but [mqtt] is disabled; \
                             enable it or run with --demo",
                            protocol
                        );
                    }
                    let driver = start_zigbee(config, store.clone(), shutdown);
                    zigbee = Some(driver.clone());
                    driver
                }
            }
        };
        info!(protocol = %protocol, driver = driver.name(), "Registered driver");
        registry.register(protocol.clone(), driver);
    }

    Ok(registry)
}

/// Connect to the broker and start the zigbee driver's state listener
fn start_zigbee(
    config: &Config,
    store: Arc<dyn DeviceStore>,
    shutdown: &CancellationToken,
) -> Arc<dyn DeviceDriver> {
    let topics = TopicScheme::new(config.mqtt.base_topic.as_str());
    let transport = Arc::new(MqttTransport::connect(
        &config.mqtt,
        &topics.state_filter(),
        shutdown.child_token(),
    ));

    let driver = ZigbeeDriver::new(transport, topics);
    let listener = driver.listener(
        store,
        Arc::new(KeywordInference),
        config.mqtt.auto_register,
    );
    tokio::spawn(listener.run(shutdown.child_token()));

    Arc::new(driver)
}
