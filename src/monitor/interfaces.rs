//! Network interface discovery shared by the Unix backends.

use super::NetworkInterfaceInfo;
use crate::types::{Result, TaskscopeError};
use nix::ifaddrs::getifaddrs;
use std::collections::BTreeMap;

/// Lists interfaces with their MAC and IP addresses, ordered by name.
///
/// IPv6 addresses use the compacted textual form (`fe80::1`).
pub fn list_interfaces() -> Result<Vec<NetworkInterfaceInfo>> {
    let addresses = getifaddrs()
        .map_err(|e| TaskscopeError::Transient(format!("getifaddrs failed: {e}")))?;

    let mut interfaces: BTreeMap<String, NetworkInterfaceInfo> = BTreeMap::new();
    for ifaddr in addresses {
        let entry = interfaces
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| NetworkInterfaceInfo {
                name: ifaddr.interface_name.clone(),
                ..Default::default()
            });

        let Some(address) = ifaddr.address else {
            continue;
        };
        if let Some(v4) = address.as_sockaddr_in() {
            push_unique(&mut entry.ipv4, v4.ip().to_string());
        } else if let Some(v6) = address.as_sockaddr_in6() {
            push_unique(&mut entry.ipv6, v6.ip().to_string());
        } else if let Some(link) = address.as_link_addr() {
            if let Some(mac) = link.addr() {
                if mac.iter().any(|&b| b != 0) {
                    entry.mac = format_mac(&mac);
                }
            }
        }
    }

    Ok(interfaces.into_values().collect())
}

pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
