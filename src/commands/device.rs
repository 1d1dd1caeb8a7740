//! Port detection commands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dmx::{find_dmx_ports, get_port_by_name, DmxPort};

/// Port information for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmxPortInfo {
    /// Identifier to pass back when opening the port.
    pub port: String,
    /// Display label for the port.
    pub label: String,
    /// USB Vendor ID, for USB adapters.
    pub vid: Option<u16>,
    /// USB Product ID, for USB adapters.
    pub pid: Option<u16>,
    /// Whether the adapter is an FTDI bridge.
    pub is_ftdi: bool,
    /// Adapter serial number (if available).
    pub serial_number: Option<String>,
}

impl From<DmxPort> for DmxPortInfo {
    fn from(port: DmxPort) -> Self {
        Self {
            label: port.display_label(),
            is_ftdi: port.is_ftdi(),
            port: port.identifier.to_string(),
            vid: port.vid,
            pid: port.pid,
            serial_number: port.serial_number,
        }
    }
}

/// Number duplicate labels in place (e.g., "FT232R #1", "FT232R #2").
pub fn number_duplicate_labels(ports: &mut [DmxPortInfo]) {
    let mut label_counts: HashMap<String, usize> = HashMap::new();
    for port in ports.iter() {
        *label_counts.entry(port.label.clone()).or_insert(0) += 1;
    }

    let mut label_indices: HashMap<String, usize> = HashMap::new();
    for port in ports.iter_mut() {
        if label_counts.get(&port.label).copied().unwrap_or(0) > 1 {
            let index = label_indices.entry(port.label.clone()).or_insert(0);
            *index += 1;
            port.label = format!("{} #{}", port.label, index);
        }
    }
}

/// Detect serial ports that could carry DMX output.
///
/// An environment without ports returns an empty list.
pub async fn detect_dmx_ports() -> Result<Vec<DmxPortInfo>, String> {
    tokio::task::spawn_blocking(|| {
        let mut ports: Vec<DmxPortInfo> =
            find_dmx_ports().into_iter().map(DmxPortInfo::from).collect();
        number_duplicate_labels(&mut ports);
        ports
    })
    .await
    .map_err(|e| format!("Failed to detect ports: {}", e))
}

/// Look up one port by name; `Ok(None)` when it is not currently present.
pub async fn find_dmx_port(port: String) -> Result<Option<DmxPortInfo>, String> {
    tokio::task::spawn_blocking(move || get_port_by_name(&port).map(DmxPortInfo::from))
        .await
        .map_err(|e| format!("Failed to look up port: {}", e))
}
