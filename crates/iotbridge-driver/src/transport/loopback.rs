//! In-process transport standing in for a broker

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

use super::{InboundMessage, Transport, INBOUND_CAPACITY};
use crate::driver::DriverError;

/// Most recent publishes kept for inspection
pub const PUBLISHED_HISTORY: usize = 256;

/// Records published messages and lets callers inject inbound ones
pub struct LoopbackTransport {
    published: Mutex<VecDeque<InboundMessage>>,
    inbound: broadcast::Sender<InboundMessage>,
    offline: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            published: Mutex::new(VecDeque::new()),
            inbound,
            offline: AtomicBool::new(false),
        }
    }

    /// Deliver a message to subscribers as if it came from the broker
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let message = InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
        };
        trace!(topic = %message.topic, "Injecting inbound message");
        // no subscribers is fine
        let _ = self.inbound.send(message);
    }

    /// Make subsequent publishes fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Up to [`PUBLISHED_HISTORY`] publishes, oldest first
    pub async fn published(&self) -> Vec<InboundMessage> {
        self.published.lock().await.iter().cloned().collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DriverError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DriverError::Transport("loopback transport is offline".to_string()));
        }

        debug!(topic = %topic, bytes = payload.len(), "Loopback publish");
        let mut published = self.published.lock().await;
        if published.len() == PUBLISHED_HISTORY {
            published.pop_front();
        }
        published.push_back(InboundMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_recorded() {
        let transport = LoopbackTransport::new();
        transport.publish("a/b", b"{}".to_vec()).await.unwrap();
        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "a/b");
    }

    #[tokio::test]
    async fn test_inject_reaches_subscribers() {
        let transport = LoopbackTransport::new();
        let mut rx = transport.subscribe();
        transport.inject("zigbee2mqtt/bulb1", br#"{"power":"on"}"#.to_vec());
        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "zigbee2mqtt/bulb1");
        assert_eq!(message.payload, br#"{"power":"on"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let transport = LoopbackTransport::new();
        for i in 0..PUBLISHED_HISTORY + 10 {
            transport.publish(&format!("t/{i}"), Vec::new()).await.unwrap();
        }
        let published = transport.published().await;
        assert_eq!(published.len(), PUBLISHED_HISTORY);
        assert_eq!(published[0].topic, "t/10");
    }

    #[tokio::test]
    async fn test_offline_publish_fails() {
        let transport = LoopbackTransport::new();
        transport.set_offline(true);
        assert!(transport.publish("t", Vec::new()).await.is_err());
        assert!(transport.published().await.is_empty());
    }
}
