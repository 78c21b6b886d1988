//! mDNS discovery of WFTNP-capable trainers on the LAN.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use log::warn;
use mdns_sd::{ServiceDaemon, ServiceEvent};

use crate::config::{DISCOVERY_WINDOW, MDNS_SERVICE_TYPE};

/// One resolved `_wahoo-fitness-tnp._tcp.local.` service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub host: String,
    pub address: String,
    pub port: u16,
    pub properties: HashMap<String, String>,
}

/// Browses for trainers for the default window (see `config::DISCOVERY_WINDOW`).
pub async fn discover() -> Vec<DiscoveredDevice> {
    discover_within(DISCOVERY_WINDOW).await
}

/// Browses for trainers for exactly `window`, deduplicating by service
/// instance name and keeping the most recently resolved record. Any
/// failure to stand up the mDNS daemon is logged and yields an empty
/// result rather than propagating an error — discovery failing is never
/// fatal to a caller that already knows a host/port.
pub async fn discover_within(window: Duration) -> Vec<DiscoveredDevice> {
    match tokio::task::spawn_blocking(move || discover_blocking(window)).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("mDNS discovery task panicked: {e}");
            Vec::new()
        }
    }
}

fn discover_blocking(window: Duration) -> Vec<DiscoveredDevice> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            warn!("mDNS discovery unavailable: failed to open multicast socket: {e}");
            return Vec::new();
        }
    };

    let receiver = match daemon.browse(MDNS_SERVICE_TYPE) {
        Ok(r) => r,
        Err(e) => {
            warn!("mDNS discovery unavailable: failed to browse {MDNS_SERVICE_TYPE}: {e}");
            return Vec::new();
        }
    };

    let mut devices: HashMap<String, DiscoveredDevice> = HashMap::new();
    let deadline = std::time::Instant::now() + window;

    loop {
        let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
            Some(d) if !d.is_zero() => d,
            _ => break,
        };
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let name = info.get_fullname().to_string();
                let host = info.get_hostname().trim_end_matches('.').to_string();
                let address = info
                    .get_addresses()
                    .iter()
                    .find_map(|ip| match ip {
                        IpAddr::V4(v4) => Some(v4.to_string()),
                        IpAddr::V6(_) => None,
                    })
                    .unwrap_or_default();
                let port = info.get_port();
                let properties = info
                    .get_properties()
                    .iter()
                    .map(|p| (p.key().to_string(), p.val_str().to_string()))
                    .collect();
                devices.insert(
                    name.clone(),
                    DiscoveredDevice {
                        name,
                        host,
                        address,
                        port,
                        properties,
                    },
                );
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(MDNS_SERVICE_TYPE);
    devices.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_device_keeps_last_ipv4_found() {
        let device = DiscoveredDevice {
            name: "Kickr._wahoo-fitness-tnp._tcp.local.".to_string(),
            host: "kickr.local".to_string(),
            address: "192.168.1.42".to_string(),
            port: 5555,
            properties: HashMap::new(),
        };
        assert_eq!(device.port, 5555);
        assert!(!device.host.ends_with('.'));
    }
}
