//! Volatile in-process device store

use async_trait::async_trait;
use iotbridge_core::{
    Capability, Device, DeviceId, DevicePatch, DeviceStore, StateMap, StoreError,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Device table behind a single reader/writer lock.
///
/// Reads run concurrently with each other; every write holds the table
/// exclusively, so a state merge is never observed half-applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn add(&self, device: Device) -> Result<(), StoreError> {
        debug!(device = %device.id, "Storing device");
        self.devices.write().await.insert(device.id.clone(), device);
        Ok(())
    }

    async fn add_if_absent(&self, device: Device) -> Result<bool, StoreError> {
        match self.devices.write().await.entry(device.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                debug!(device = %device.id, "Storing new device");
                slot.insert(device);
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.read().await.values().cloned().collect())
    }

    async fn update_state(&self, id: &DeviceId, updates: &StateMap) -> Result<(), StoreError> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(device) => device.merge_state(updates),
            None => debug!(device = %id, "Ignoring state update for unknown device"),
        }
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &DeviceId,
        patch: &DevicePatch,
    ) -> Result<Option<Device>, StoreError> {
        let mut devices = self.devices.write().await;
        Ok(devices.get_mut(id).map(|device| {
            device.apply_patch(patch);
            device.clone()
        }))
    }

    async fn set_capabilities(
        &self,
        id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<Option<Device>, StoreError> {
        let mut devices = self.devices.write().await;
        Ok(devices.get_mut(id).map(|device| {
            device.replace_capabilities(capabilities);
            device.clone()
        }))
    }

    async fn delete(&self, id: &DeviceId) -> Result<(), StoreError> {
        self.devices.write().await.remove(id);
        Ok(())
    }
}
