//! MQTT transport backed by rumqttc

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{InboundMessage, Transport, INBOUND_CAPACITY};
use crate::driver::DriverError;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Outgoing requests buffered between the client and its event loop
const REQUEST_CAPACITY: usize = 64;

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Connect to a broker; the zigbee driver cannot run without one
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic prefix used by the bridge, e.g. `zigbee2mqtt`
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Add unknown devices seen on the bus to the store
    #[serde(default = "default_auto_register")]
    pub auto_register: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "iot-bridge-zigbee".to_string()
}

fn default_base_topic() -> String {
    "zigbee2mqtt".to_string()
}

fn default_auto_register() -> bool {
    true
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            auto_register: default_auto_register(),
        }
    }
}

/// Publishes are refused unless the broker has acknowledged the current
/// connection, so a command is never reported as sent while it sits in a
/// queue waiting for a reconnect.
pub struct MqttTransport {
    client: AsyncClient,
    inbound: broadcast::Sender<InboundMessage>,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Start a client and a background task driving its event loop.
    ///
    /// `filter` is (re)subscribed on every connection acknowledgement. The
    /// task exits when `cancel` fires.
    pub fn connect(settings: &MqttSettings, filter: &str, cancel: CancellationToken) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            host = %settings.host,
            port = settings.port,
            filter = %filter,
            "Connecting to MQTT broker"
        );

        tokio::spawn(drive(
            eventloop,
            client.clone(),
            filter.to_string(),
            inbound.clone(),
            connected.clone(),
            cancel,
        ));

        Self {
            client,
            inbound,
            connected,
        }
    }

    /// Whether the broker has acknowledged the current connection
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filter: String,
    inbound: broadcast::Sender<InboundMessage>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                connected.store(true, Ordering::SeqCst);
                if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                    warn!(error = %e, filter = %filter, "Failed to subscribe");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, "MQTT message");
                let _ = inbound.send(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "MQTT disconnect");
    }
    info!("MQTT event loop stopped");
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DriverError> {
        if !self.is_connected() {
            return Err(DriverError::Transport(
                "not connected to MQTT broker".to_string(),
            ));
        }
        // a full request queue means the event loop is stuck; fail instead of waiting
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| DriverError::Transport(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }
}
