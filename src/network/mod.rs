//! Host network management: interface enumeration and labeled IPv4 aliases
//! bound through route-netlink.
//!
//! Aliases added by the daemon carry a `<ifname>:iec<instance_id>` label
//! (truncated to the kernel limit); the label is the sole ownership marker
//! and allows bulk removal of leftover aliases.

use std::net::{IpAddr, Ipv4Addr};

use futures_util::TryStreamExt;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use nix::errno::Errno;
use rtnetlink::{Error as NetlinkError, Handle};
use tracing::{debug, error, info, warn};

/// Kernel interface-label limit (IFNAMSIZ minus the terminator).
const MAX_LABEL_LEN: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub is_up: bool,
    pub addresses: Vec<String>,
}

/// Addresses that never get configured on an interface: the wildcard and
/// anything in the loopback net.
pub fn should_configure_ip(ip_address: &str) -> bool {
    !(ip_address == "0.0.0.0" || ip_address.starts_with("127."))
}

/// Alias label for one instance, truncated to the kernel limit.
pub fn alias_label(interface_name: &str, instance_id: &str) -> String {
    let mut label = format!("{interface_name}:iec{instance_id}");
    label.truncate(MAX_LABEL_LEN);
    label
}

/// Enumerate non-loopback interfaces, aggregating IPv4 addresses per
/// interface.
pub fn get_network_interfaces() -> Vec<InterfaceInfo> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            error!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut interfaces: std::collections::BTreeMap<String, InterfaceInfo> =
        std::collections::BTreeMap::new();

    for ifaddr in addrs {
        let name = ifaddr.interface_name.clone();
        let entry = interfaces.entry(name.clone()).or_insert_with(|| {
            InterfaceInfo {
                name: name.clone(),
                description: name.clone(),
                is_up: ifaddr
                    .flags
                    .contains(nix::net::if_::InterfaceFlags::IFF_UP),
                addresses: Vec::new(),
            }
        });
        if let Some(address) = ifaddr.address {
            if let Some(sin) = address.as_sockaddr_in() {
                entry
                    .addresses
                    .push(Ipv4Addr::from(sin.ip()).to_string());
            }
        }
    }

    interfaces
        .into_values()
        .filter(|iface| iface.name != "lo")
        .collect()
}

async fn open_handle() -> Option<Handle> {
    match rtnetlink::new_connection() {
        Ok((connection, handle, _)) => {
            tokio::spawn(connection);
            Some(handle)
        }
        Err(e) => {
            error!("Failed to open route-netlink connection: {}", e);
            None
        }
    }
}

async fn link_index(handle: &Handle, interface_name: &str) -> Option<u32> {
    let mut links = handle
        .link()
        .get()
        .match_name(interface_name.to_string())
        .execute();
    match links.try_next().await {
        Ok(Some(link)) => Some(link.header.index),
        _ => {
            error!("Failed to resolve interface index for {}", interface_name);
            None
        }
    }
}

fn netlink_errno(err: &NetlinkError) -> Option<i32> {
    if let NetlinkError::NetlinkError(message) = err {
        return message.code.map(|code| code.get().abs());
    }
    None
}

fn message_local_v4(message: &AddressMessage) -> Option<Ipv4Addr> {
    message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Local(IpAddr::V4(v4)) | AddressAttribute::Address(IpAddr::V4(v4)) => {
            Some(*v4)
        }
        _ => None,
    })
}

fn message_label(message: &AddressMessage) -> Option<&str> {
    message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Label(label) => Some(label.as_str()),
        _ => None,
    })
}

/// Add `ip/prefix_len` to `interface_name`, tagged with `label`. Wildcard
/// and loopback addresses are a successful no-op; an already-existing
/// address is tolerated.
pub async fn add_ip_address(
    interface_name: &str,
    ip_address: &str,
    prefix_len: u8,
    label: &str,
) -> bool {
    if !should_configure_ip(ip_address) {
        debug!("IP {} does not need configuration", ip_address);
        return true;
    }

    let ip: Ipv4Addr = match ip_address.parse() {
        Ok(ip) => ip,
        Err(_) => {
            error!("Failed to parse IP address: {}", ip_address);
            return false;
        }
    };

    let Some(handle) = open_handle().await else {
        return false;
    };
    let Some(index) = link_index(&handle, interface_name).await else {
        return false;
    };

    let mut request = handle.address().add(index, IpAddr::V4(ip), prefix_len);
    if !label.is_empty() {
        let mut truncated = label.to_string();
        truncated.truncate(MAX_LABEL_LEN);
        request
            .message_mut()
            .attributes
            .push(AddressAttribute::Label(truncated));
    }

    info!(
        "Adding IP address {}/{} to {}{}",
        ip_address,
        prefix_len,
        interface_name,
        if label.is_empty() {
            String::new()
        } else {
            format!(" label {label}")
        }
    );

    match request.execute().await {
        Ok(()) => {
            info!("Added IP {} to {}", ip_address, interface_name);
            true
        }
        Err(e) if netlink_errno(&e) == Some(Errno::EEXIST as i32) => {
            warn!("IP address already exists: {}", ip_address);
            true
        }
        Err(e) => {
            error!("Failed to add IP address {}: {}", ip_address, e);
            false
        }
    }
}

/// Remove `ip/prefix_len` from `interface_name`. Tolerates the address not
/// being present.
pub async fn remove_ip_address(interface_name: &str, ip_address: &str, prefix_len: u8) -> bool {
    if !should_configure_ip(ip_address) {
        debug!("IP {} does not need cleanup", ip_address);
        return true;
    }

    let ip: Ipv4Addr = match ip_address.parse() {
        Ok(ip) => ip,
        Err(_) => {
            error!("Failed to parse IP address: {}", ip_address);
            return false;
        }
    };

    let Some(handle) = open_handle().await else {
        return false;
    };
    let Some(index) = link_index(&handle, interface_name).await else {
        return false;
    };

    let mut dump = handle.address().get().execute();
    let mut target = None;
    loop {
        match dump.try_next().await {
            Ok(Some(message)) => {
                if message.header.index == index
                    && message.header.prefix_len == prefix_len
                    && message_local_v4(&message) == Some(ip)
                {
                    target = Some(message);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to list addresses on {}: {}", interface_name, e);
                return false;
            }
        }
    }

    let Some(message) = target else {
        warn!("IP address does not exist: {}", ip_address);
        return true;
    };

    info!(
        "Removing IP address {}/{} from {}",
        ip_address, prefix_len, interface_name
    );
    match handle.address().del(message).execute().await {
        Ok(()) => {
            info!("Removed IP {} from {}", ip_address, interface_name);
            true
        }
        Err(e) if netlink_errno(&e) == Some(Errno::EADDRNOTAVAIL as i32) => {
            warn!("IP address already gone: {}", ip_address);
            true
        }
        Err(e) => {
            error!("Failed to remove IP address {}: {}", ip_address, e);
            false
        }
    }
}

/// Remove every address on `interface_name` whose label equals `label`.
/// Individual removal failures are logged without failing the sweep.
pub async fn remove_by_label(interface_name: &str, label: &str) -> bool {
    if label.is_empty() {
        error!("Label cannot be empty for remove_by_label");
        return false;
    }

    let Some(handle) = open_handle().await else {
        return false;
    };
    let Some(index) = link_index(&handle, interface_name).await else {
        return false;
    };

    let mut dump = handle.address().get().execute();
    let mut matches = Vec::new();
    loop {
        match dump.try_next().await {
            Ok(Some(message)) => {
                if message.header.index == index && message_label(&message) == Some(label) {
                    matches.push(message);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to list addresses on {}: {}", interface_name, e);
                return false;
            }
        }
    }

    if matches.is_empty() {
        warn!("No addresses with label '{}' on {}", label, interface_name);
        return true;
    }

    let mut removed = 0usize;
    for message in matches {
        let ip = message_local_v4(&message)
            .map(|v4| v4.to_string())
            .unwrap_or_default();
        match handle.address().del(message).execute().await {
            Ok(()) => {
                removed += 1;
                debug!("Removed address {} with label '{}'", ip, label);
            }
            Err(e) => error!("Failed to remove address {}: {}", ip, e),
        }
    }
    info!("Removed {} address(es) with label '{}'", removed, label);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_loopback_are_skipped() {
        assert!(!should_configure_ip("0.0.0.0"));
        assert!(!should_configure_ip("127.0.0.1"));
        assert!(!should_configure_ip("127.1.2.3"));
        assert!(should_configure_ip("10.77.0.2"));
        assert!(should_configure_ip("192.168.1.10"));
    }

    #[test]
    fn labels_are_truncated_to_the_kernel_limit() {
        assert_eq!(alias_label("eth0", "b"), "eth0:iecb");
        let long = alias_label("enp0s31f6", "substation-7");
        assert_eq!(long.len(), 15);
        assert!(long.starts_with("enp0s31f6:iec"));
    }

    #[test]
    fn loopback_is_excluded_from_enumeration() {
        let interfaces = get_network_interfaces();
        assert!(interfaces.iter().all(|iface| iface.name != "lo"));
    }
}
