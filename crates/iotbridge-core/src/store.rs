//! The device store contract
//!
//! Storage backends live in `iotbridge-store`. The contract is kept here so
//! drivers can write observations into a store without depending on any
//! particular backend.

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::Capability;
use crate::device::{Device, DeviceId, DevicePatch, StateMap};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Durable record of device identity, metadata, and last-known state.
///
/// Mutations of a single device are mutually exclusive; the last completed
/// write wins for any given state key. Writes to distinct devices should not
/// block one another, though a backend with a single writer may serialize them.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or replace the device with this id
    async fn add(&self, device: Device) -> Result<(), StoreError>;

    /// Insert the device only if its id is free; returns whether it was
    /// inserted. A device already present is left exactly as it is.
    async fn add_if_absent(&self, device: Device) -> Result<bool, StoreError>;

    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, StoreError>;

    /// All devices, in no particular order
    async fn get_all(&self) -> Result<Vec<Device>, StoreError>;

    /// Merge `updates` into the device's state.
    ///
    /// Unknown ids are ignored so that observations arriving before
    /// registration completes are not treated as failures.
    async fn update_state(&self, id: &DeviceId, updates: &StateMap) -> Result<(), StoreError>;

    /// Apply a name/room patch and return the updated device, or `None` if
    /// the id is unknown
    async fn update_metadata(
        &self,
        id: &DeviceId,
        patch: &DevicePatch,
    ) -> Result<Option<Device>, StoreError>;

    /// Replace the capability list wholesale; `None` if the id is unknown
    async fn set_capabilities(
        &self,
        id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<Option<Device>, StoreError>;

    async fn delete(&self, id: &DeviceId) -> Result<(), StoreError>;
}
