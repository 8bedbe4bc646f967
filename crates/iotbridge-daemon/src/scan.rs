//! Simulated device discovery

use iotbridge_core::{DeviceId, DiscoveredDevice};
use tokio::sync::RwLock;
use tracing::info;

/// Protocols scanned when a request names none
pub const DEFAULT_PROTOCOLS: [&str; 2] = ["zigbee", "zwave"];

fn candidates() -> Vec<DiscoveredDevice> {
    vec![
        DiscoveredDevice {
            id: DeviceId::new("bulb1"),
            name: "Unregistered Bulb".to_string(),
            device_type: "bulb".to_string(),
            protocol: "zigbee".to_string(),
            signal: -42,
        },
        DiscoveredDevice {
            id: DeviceId::new("plug1"),
            name: "New Plug".to_string(),
            device_type: "smart_plug".to_string(),
            protocol: "zwave".to_string(),
            signal: -55,
        },
    ]
}

/// Holds the results of the most recent scan
#[derive(Debug, Default)]
pub struct Scanner {
    results: RwLock<Vec<DiscoveredDevice>>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the previous results with devices on the given protocols.
    ///
    /// An empty list scans every default protocol.
    pub async fn start_scan(&self, protocols: &[String]) -> Vec<String> {
        let protocols: Vec<String> = if protocols.is_empty() {
            DEFAULT_PROTOCOLS.iter().map(|p| p.to_string()).collect()
        } else {
            protocols.to_vec()
        };

        let found: Vec<DiscoveredDevice> = candidates()
            .into_iter()
            .filter(|d| protocols.iter().any(|p| *p == d.protocol))
            .collect();
        info!(protocols = ?protocols, found = found.len(), "Scan complete");

        *self.results.write().await = found;
        protocols
    }

    pub async fn results(&self) -> Vec<DiscoveredDevice> {
        self.results.read().await.clone()
    }

    pub async fn find(&self, id: &DeviceId) -> Option<DiscoveredDevice> {
        self.results.read().await.iter().find(|d| d.id == *id).cloned()
    }
}
