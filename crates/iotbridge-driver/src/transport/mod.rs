//! Pub/sub transports used by networked drivers

mod loopback;
mod mqtt;

pub use loopback::LoopbackTransport;
pub use mqtt::{MqttSettings, MqttTransport};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::driver::DriverError;

/// Capacity of the inbound message fan-out
pub(crate) const INBOUND_CAPACITY: usize = 256;

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe channel to a message broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload; returns once the transport has accepted it
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DriverError>;

    /// Receive every message arriving on the transport's subscription
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;
}
