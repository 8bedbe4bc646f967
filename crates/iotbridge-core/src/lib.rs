//! IoT Bridge Core - Device model, capability schemas, and parameter validation
//!
//! This crate provides the foundational types for the IoT Bridge system:
//! - Device records and the canonical string-valued state map
//! - Capability schemas with typed parameter specifications
//! - The parameter validator that turns raw invocation input into canonical form
//! - Per-type capability seeding and payload-based capability inference
//! - The `DeviceStore` contract implemented by the storage backends

pub mod capability;
pub mod catalog;
pub mod device;
pub mod infer;
pub mod store;
pub mod validate;

pub use capability::{Capability, IntRange, ParameterSpec};
pub use catalog::capabilities_for_type;
pub use device::{Device, DeviceId, DevicePatch, DiscoveredDevice, StateMap};
pub use infer::{CapabilityInference, KeywordInference};
pub use store::{DeviceStore, StoreError};
pub use validate::{stringify_value, validate, ValidationError};
