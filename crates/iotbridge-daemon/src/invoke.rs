//! Capability invocation
//!
//! An invocation runs a fixed pipeline: look up the device, look up the
//! capability, validate the input, send the canonical command through the
//! device's driver, then merge the command into stored state. A failure at any
//! step stops the pipeline; nothing is retried.

use iotbridge_core::{validate, DeviceId, DeviceStore, StateMap, StoreError, ValidationError};
use iotbridge_driver::{DriverError, DriverRegistry};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),
    #[error("Capability '{capability}' not supported by device {device}")]
    UnsupportedCapability { device: DeviceId, capability: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No driver for protocol: {0}")]
    UnknownProtocol(String),
    #[error("Driver communication failed: {0}")]
    DriverCommunication(#[source] DriverError),
    /// The device accepted the command but the store did not record it
    #[error("Device updated but state not persisted: {source}")]
    Persistence { source: StoreError, applied: StateMap },
    #[error("Device lookup failed: {0}")]
    Lookup(#[source] StoreError),
    #[error("Invocation cancelled")]
    Cancelled,
}

/// Result of a successful invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub capability: String,
    /// Canonical updates sent to the device and merged into its state
    pub new_state: StateMap,
}

pub struct Coordinator {
    store: Arc<dyn DeviceStore>,
    drivers: Arc<DriverRegistry>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn DeviceStore>, drivers: Arc<DriverRegistry>) -> Self {
        Self { store, drivers }
    }

    pub async fn invoke(
        &self,
        id: &DeviceId,
        capability: &str,
        input: &Map<String, Value>,
    ) -> Result<Invocation, InvokeError> {
        self.invoke_with_cancel(id, capability, input, &CancellationToken::new())
            .await
    }

    /// Invoke, giving up if `cancel` fires before the driver has answered.
    ///
    /// Once the driver has accepted the command the store write always runs.
    pub async fn invoke_with_cancel(
        &self,
        id: &DeviceId,
        capability: &str,
        input: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Invocation, InvokeError> {
        let device = self
            .store
            .get(id)
            .await
            .map_err(InvokeError::Lookup)?
            .ok_or_else(|| InvokeError::DeviceNotFound(id.clone()))?;

        let schema = device
            .capability(capability)
            .ok_or_else(|| InvokeError::UnsupportedCapability {
                device: id.clone(),
                capability: capability.to_string(),
            })?;

        let updates = validate(schema, input)?;
        debug!(device = %id, capability = %capability, updates = ?updates, "Validated invocation");

        let driver = self.drivers.driver_for(&device).map_err(|e| match e {
            DriverError::UnknownProtocol(protocol) => InvokeError::UnknownProtocol(protocol),
            other => InvokeError::DriverCommunication(other),
        })?;

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(device = %id, capability = %capability, "Invocation cancelled");
                return Err(InvokeError::Cancelled);
            }
            sent = driver.set_state(&device, &updates) => sent,
        };

        if let Err(e) = sent {
            warn!(
                device = %id,
                driver = driver.name(),
                error = %e,
                "Driver rejected command"
            );
            return Err(InvokeError::DriverCommunication(e));
        }

        if let Err(source) = self.store.update_state(id, &updates).await {
            error!(
                device = %id,
                capability = %capability,
                error = %source,
                "Command applied but state not persisted"
            );
            return Err(InvokeError::Persistence {
                source,
                applied: updates,
            });
        }

        info!(device = %id, capability = %capability, "Capability invoked");
        Ok(Invocation {
            capability: capability.to_string(),
            new_state: updates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iotbridge_core::{capabilities_for_type, Capability, Device, DevicePatch};
    use iotbridge_driver::{
        DeviceDriver, LoopbackTransport, MockDriver, TopicScheme, ZigbeeDriver,
    };
    use iotbridge_store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Counts calls and never fails
    #[derive(Default)]
    struct CountingDriver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceDriver for CountingDriver {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError> {
            Ok(device.state.clone())
        }

        async fn set_state(&self, _: &Device, _: &StateMap) -> Result<(), DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Never answers
    struct StalledDriver;

    #[async_trait]
    impl DeviceDriver for StalledDriver {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError> {
            Err(DriverError::NoStateAvailable(device.id.clone()))
        }

        async fn set_state(&self, _: &Device, _: &StateMap) -> Result<(), DriverError> {
            std::future::pending().await
        }
    }

    /// Signals when a command arrives, then holds it until released
    #[derive(Default)]
    struct GatedDriver {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DeviceDriver for GatedDriver {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError> {
            Ok(device.state.clone())
        }

        async fn set_state(&self, _: &Device, _: &StateMap) -> Result<(), DriverError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn power(value: &str) -> StateMap {
        [("power".to_string(), value.to_string())].into()
    }

    /// Reads work, state writes fail
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl DeviceStore for ReadOnlyStore {
        async fn add(&self, device: Device) -> Result<(), StoreError> {
            self.0.add(device).await
        }

        async fn add_if_absent(&self, device: Device) -> Result<bool, StoreError> {
            self.0.add_if_absent(device).await
        }

        async fn get(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
            self.0.get(id).await
        }

        async fn get_all(&self) -> Result<Vec<Device>, StoreError> {
            self.0.get_all().await
        }

        async fn update_state(&self, _: &DeviceId, _: &StateMap) -> Result<(), StoreError> {
            Err(StoreError::Database("disk full".to_string()))
        }

        async fn update_metadata(
            &self,
            id: &DeviceId,
            patch: &DevicePatch,
        ) -> Result<Option<Device>, StoreError> {
            self.0.update_metadata(id, patch).await
        }

        async fn set_capabilities(
            &self,
            id: &DeviceId,
            capabilities: Vec<Capability>,
        ) -> Result<Option<Device>, StoreError> {
            self.0.set_capabilities(id, capabilities).await
        }

        async fn delete(&self, id: &DeviceId) -> Result<(), StoreError> {
            self.0.delete(id).await
        }
    }

    fn bulb(protocol: &str) -> Device {
        let mut device = Device::new(DeviceId::new("bulb1"), "Lamp", "bulb", protocol, "kitchen");
        device.capabilities = capabilities_for_type("bulb");
        device
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    async fn coordinator_with(
        store: Arc<dyn DeviceStore>,
        protocol: &str,
        driver: Arc<dyn DeviceDriver>,
    ) -> Coordinator {
        store.add(bulb(protocol)).await.unwrap();
        let drivers = DriverRegistry::new().with(protocol, driver);
        Coordinator::new(store, Arc::new(drivers))
    }

    #[tokio::test]
    async fn test_invoke_then_get_reflects_update() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator =
            coordinator_with(store.clone(), "mock", Arc::new(MockDriver::new())).await;

        let result = coordinator
            .invoke(&DeviceId::new("bulb1"), "brightness", &params(json!({"level": 57.9})))
            .await
            .unwrap();
        assert_eq!(result.capability, "brightness");
        assert_eq!(result.new_state["level"], "57");

        let stored = store.get(&DeviceId::new("bulb1")).await.unwrap().unwrap();
        assert_eq!(stored.state["level"], "57");
    }

    #[tokio::test]
    async fn test_color_array_canonical_form() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator =
            coordinator_with(store.clone(), "mock", Arc::new(MockDriver::new())).await;

        let result = coordinator
            .invoke(&DeviceId::new("bulb1"), "color", &params(json!({"rgb": [10, 20, 30]})))
            .await
            .unwrap();
        assert_eq!(result.new_state["rgb"], "[10,20,30]");
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let driver = Arc::new(CountingDriver::default());
        let coordinator =
            coordinator_with(Arc::new(MemoryStore::new()), "mock", driver.clone()).await;

        let err = coordinator
            .invoke(&DeviceId::new("ghost"), "power", &params(json!({"power": "on"})))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::DeviceNotFound(_)));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_capability() {
        let coordinator =
            coordinator_with(Arc::new(MemoryStore::new()), "mock", Arc::new(MockDriver::new()))
                .await;
        let err = coordinator
            .invoke(&DeviceId::new("bulb1"), "volume", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::UnsupportedCapability { .. }));
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_driver() {
        let driver = Arc::new(CountingDriver::default());
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator = coordinator_with(store.clone(), "mock", driver.clone()).await;
        let id = DeviceId::new("bulb1");

        let err = coordinator
            .invoke(&id, "brightness", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Validation(ValidationError::MissingParameter(ref p)) if p == "level"
        ));

        let err = coordinator
            .invoke(&id, "brightness", &params(json!({"level": 150})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Validation(ValidationError::OutOfRange(ref p)) if p == "level"
        ));

        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
        assert!(store.get(&id).await.unwrap().unwrap().state.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        store.add(bulb("thread")).await.unwrap();
        let coordinator = Coordinator::new(store, Arc::new(DriverRegistry::new()));

        let err = coordinator
            .invoke(&DeviceId::new("bulb1"), "power", &params(json!({"power": "on"})))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::UnknownProtocol(ref p) if p == "thread"));
    }

    #[tokio::test]
    async fn test_driver_failure_leaves_store_untouched() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.set_offline(true);
        let driver = Arc::new(ZigbeeDriver::new(transport, TopicScheme::new("zigbee2mqtt")));
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator = coordinator_with(store.clone(), "zigbee", driver).await;

        let err = coordinator
            .invoke(&DeviceId::new("bulb1"), "power", &params(json!({"power": "on"})))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::DriverCommunication(_)));

        let stored = store.get(&DeviceId::new("bulb1")).await.unwrap().unwrap();
        assert!(stored.state.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_carries_applied_update() {
        let driver = Arc::new(CountingDriver::default());
        let store: Arc<dyn DeviceStore> = Arc::new(ReadOnlyStore(MemoryStore::new()));
        let coordinator = coordinator_with(store, "mock", driver.clone()).await;

        let err = coordinator
            .invoke(&DeviceId::new("bulb1"), "power", &params(json!({"power": "off"})))
            .await
            .unwrap_err();
        match err {
            InvokeError::Persistence { applied, .. } => {
                assert_eq!(applied.get("power").map(String::as_str), Some("off"));
            }
            other => panic!("expected persistence error, got {other:?}"),
        }
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_driver_answers() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(
            coordinator_with(store.clone(), "mock", Arc::new(StalledDriver)).await,
        );
        let cancel = CancellationToken::new();

        let task = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .invoke_with_cancel(
                        &DeviceId::new("bulb1"),
                        "power",
                        &params(json!({"power": "on"})),
                        &cancel,
                    )
                    .await
            })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));

        let stored = store.get(&DeviceId::new("bulb1")).await.unwrap().unwrap();
        assert!(stored.state.is_empty());
    }

    #[tokio::test]
    async fn test_observation_during_driver_call_is_overwritten() {
        let driver = Arc::new(GatedDriver::default());
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator =
            Arc::new(coordinator_with(store.clone(), "mock", driver.clone()).await);
        let id = DeviceId::new("bulb1");

        let invoke = {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tokio::spawn(async move {
                coordinator
                    .invoke(&id, "power", &params(json!({"power": "on"})))
                    .await
            })
        };

        // the report lands while the command is still with the driver
        driver.entered.notified().await;
        store.update_state(&id, &power("off")).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().state["power"], "off");
        driver.release.notify_one();

        invoke.await.unwrap().unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().state["power"], "on");
    }

    #[tokio::test]
    async fn test_observation_after_invocation_wins() {
        let driver = Arc::new(GatedDriver::default());
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
        let coordinator =
            Arc::new(coordinator_with(store.clone(), "mock", driver.clone()).await);
        let id = DeviceId::new("bulb1");

        driver.release.notify_one();
        coordinator
            .invoke(&id, "power", &params(json!({"power": "on"})))
            .await
            .unwrap();
        store.update_state(&id, &power("off")).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().unwrap().state["power"], "off");
    }
}
