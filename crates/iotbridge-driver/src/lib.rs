//! IoT Bridge Driver - Protocol drivers for device commands and state
//!
//! A driver turns a validated, canonical command into protocol traffic and
//! reports the last state it knows for a device. Drivers are picked per device
//! through the [`DriverRegistry`] by the device's `protocol` field.

pub mod driver;
pub mod mock;
pub mod registry;
pub mod transport;
pub mod zigbee;

pub use driver::{DeviceDriver, DriverError};
pub use mock::MockDriver;
pub use registry::DriverRegistry;
pub use transport::{InboundMessage, LoopbackTransport, MqttSettings, MqttTransport, Transport};
pub use zigbee::{Observation, StateListener, TopicScheme, ZigbeeDriver};
