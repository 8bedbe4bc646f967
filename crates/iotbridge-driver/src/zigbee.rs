//! Zigbee driver speaking zigbee2mqtt topic conventions
//!
//! Commands are published as a flat JSON object to `<base>/<id>/set`. Devices
//! report on `<base>/<id>`; the [`StateListener`] caches each report for
//! `get_state` and writes it into the device store.

use async_trait::async_trait;
use iotbridge_core::{
    stringify_value, CapabilityInference, Device, DeviceId, DeviceStore, StateMap, StoreError,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{DeviceDriver, DriverError};
use crate::transport::{InboundMessage, Transport};

/// Protocol (and device type) assigned to devices discovered on the bus
pub const ZIGBEE: &str = "zigbee";

/// Topic naming under a base prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl TopicScheme {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn command_topic(&self, id: &DeviceId) -> String {
        format!("{}/{}/set", self.base, id)
    }

    pub fn state_topic(&self, id: &DeviceId) -> String {
        format!("{}/{}", self.base, id)
    }

    /// Single-level wildcard covering every device's report topic
    pub fn state_filter(&self) -> String {
        format!("{}/+", self.base)
    }

    /// Device id for a report topic; `None` for commands, bridge topics, and
    /// anything outside the base
    pub fn device_for_state_topic(&self, topic: &str) -> Option<DeviceId> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;
        if rest.is_empty() || rest.contains('/') || rest == "bridge" {
            return None;
        }
        Some(DeviceId::new(rest))
    }
}

/// A device report decoded from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub device_id: DeviceId,
    /// Payload as received, used for capability inference
    pub raw: Map<String, Value>,
    /// Payload coerced to canonical strings
    pub state: StateMap,
}

impl Observation {
    /// Decode a report; non-object payloads yield `None`
    pub fn parse(device_id: DeviceId, payload: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(raw)) => {
                let state = raw
                    .iter()
                    .map(|(k, v)| (k.clone(), stringify_value(v)))
                    .collect();
                Some(Self {
                    device_id,
                    raw,
                    state,
                })
            }
            Ok(_) => {
                warn!(device = %device_id, "Ignoring non-object report");
                None
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "Ignoring malformed report");
                None
            }
        }
    }
}

type StateCache = Arc<RwLock<HashMap<DeviceId, StateMap>>>;

pub struct ZigbeeDriver {
    transport: Arc<dyn Transport>,
    topics: TopicScheme,
    states: StateCache,
}

impl ZigbeeDriver {
    pub fn new(transport: Arc<dyn Transport>, topics: TopicScheme) -> Self {
        Self {
            transport,
            topics,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Build the listener that feeds reports into the cache and the store.
    ///
    /// The subscription is taken here, so reports published after this call
    /// are not missed even if `run` starts later.
    pub fn listener(
        &self,
        store: Arc<dyn DeviceStore>,
        inference: Arc<dyn CapabilityInference>,
        auto_register: bool,
    ) -> StateListener {
        StateListener {
            inbound: self.transport.subscribe(),
            topics: self.topics.clone(),
            states: self.states.clone(),
            store,
            inference,
            auto_register,
        }
    }
}

#[async_trait]
impl DeviceDriver for ZigbeeDriver {
    fn name(&self) -> &'static str {
        ZIGBEE
    }

    async fn get_state(&self, device: &Device) -> Result<StateMap, DriverError> {
        self.states
            .read()
            .await
            .get(&device.id)
            .cloned()
            .ok_or_else(|| DriverError::NoStateAvailable(device.id.clone()))
    }

    async fn set_state(&self, device: &Device, updates: &StateMap) -> Result<(), DriverError> {
        let topic = self.topics.command_topic(&device.id);
        let payload = serde_json::to_vec(updates)?;
        debug!(device = %device.id, topic = %topic, "Publishing command");
        self.transport.publish(&topic, payload).await
    }
}

/// Ingests device reports from the transport subscription
pub struct StateListener {
    inbound: broadcast::Receiver<InboundMessage>,
    topics: TopicScheme,
    states: StateCache,
    store: Arc<dyn DeviceStore>,
    inference: Arc<dyn CapabilityInference>,
    auto_register: bool,
}

impl StateListener {
    /// Process reports until cancelled or the transport goes away
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(filter = %self.topics.state_filter(), "State listener started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.inbound.recv() => message,
            };

            match message {
                Ok(message) => {
                    if let Err(e) = self.handle(&message).await {
                        warn!(topic = %message.topic, error = %e, "Failed to record report");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "State listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("State listener stopped");
    }

    /// Record one inbound message; messages that are not reports are skipped
    pub async fn handle(&self, message: &InboundMessage) -> Result<(), StoreError> {
        let Some(device_id) = self.topics.device_for_state_topic(&message.topic) else {
            return Ok(());
        };
        let Some(observation) = Observation::parse(device_id, &message.payload) else {
            return Ok(());
        };

        self.states
            .write()
            .await
            .insert(observation.device_id.clone(), observation.state.clone());

        let known = self.store.get(&observation.device_id).await?.is_some();
        if !known && self.auto_register {
            let mut device = Device::new(
                observation.device_id.clone(),
                observation.device_id.as_str(),
                ZIGBEE,
                ZIGBEE,
                "unknown",
            );
            device.state = observation.state.clone();
            device.replace_capabilities(self.inference.infer(&observation.raw));
            let capabilities = device.capabilities.len();

            if self.store.add_if_absent(device).await? {
                info!(
                    device = %observation.device_id,
                    capabilities,
                    "Auto-registered device from report"
                );
                return Ok(());
            }
            // registered by someone else since the lookup
            debug!(device = %observation.device_id, "Device appeared during auto-registration");
        } else if !known {
            debug!(device = %observation.device_id, "Report for unregistered device");
        }

        self.store
            .update_state(&observation.device_id, &observation.state)
            .await
    }
}
