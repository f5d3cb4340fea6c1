//! Discovering the port network interfaces of netdevsim devices.
//!
//! Creating a netdevsim device does not tell which network interfaces its
//! ports became. Each port interface however reports its parent device, the
//! parent's bus, and a physical port name of the form `p<ordinal>`, so a link
//! dump of the current network namespace maps them back.

use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_utils::nla::{DefaultNla, Nla};
use tempnet_common::constants::{NETDEVSIM_BUS, NETDEVSIM_DEVICE_PREFIX};
use tempnet_common::error::{Result, TempnetError};
use tempnet_core::NetlinkSession;
use tempnet_core::netlink::link_name;

const IFLA_PHYS_PORT_NAME: u16 = 38;
const IFLA_PARENT_DEV_NAME: u16 = 56;
const IFLA_PARENT_DEV_BUS_NAME: u16 = 57;

/// One port interface of a bus device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// Bus the device sits on, such as `netdevsim`.
    pub bus: String,
    /// Device name on the bus, such as `netdevsim3`.
    pub device: String,
    /// Port ordinal within the device, starting at zero.
    pub port: u32,
    /// Current interface name.
    pub name: String,
    /// Interface index.
    pub index: u32,
}

/// Lists the ports of all bus devices.
pub trait PortEnumerator {
    /// Returns all ports known, across all devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn ports(&self) -> Result<Vec<PortEntry>>;
}

/// Enumerates ports by dumping the links of a netlink session's namespace.
#[derive(Debug)]
pub struct RtnlPortEnumerator<'s> {
    session: &'s NetlinkSession,
}

impl<'s> RtnlPortEnumerator<'s> {
    /// Enumerates ports visible through `session`.
    #[must_use]
    pub const fn new(session: &'s NetlinkSession) -> Self {
        Self { session }
    }
}

impl PortEnumerator for RtnlPortEnumerator<'_> {
    fn ports(&self) -> Result<Vec<PortEntry>> {
        Ok(self
            .session
            .links()?
            .iter()
            .filter_map(port_entry)
            .collect())
    }
}

/// Extracts the port identity of a link, if it is the port of a bus device.
#[must_use]
pub fn port_entry(link: &LinkMessage) -> Option<PortEntry> {
    let mut bus = None;
    let mut device = None;
    let mut port = None;
    for attr in &link.attributes {
        match attr {
            LinkAttribute::PhysPortName(name) => port = port_ordinal(name),
            // parent device attributes have no typed variant
            LinkAttribute::Other(nla) => match nla.kind() {
                IFLA_PARENT_DEV_BUS_NAME => bus = nla_string(nla),
                IFLA_PARENT_DEV_NAME => device = nla_string(nla),
                IFLA_PHYS_PORT_NAME => port = nla_string(nla).as_deref().and_then(port_ordinal),
                _ => {}
            },
            _ => {}
        }
    }
    Some(PortEntry {
        bus: bus?,
        device: device?,
        port: port?,
        name: link_name(link)?.to_string(),
        index: link.header.index,
    })
}

fn port_ordinal(name: &str) -> Option<u32> {
    name.strip_prefix('p')?.parse().ok()
}

fn nla_string(nla: &DefaultNla) -> Option<String> {
    let mut buf = vec![0; nla.value_len()];
    nla.emit_value(&mut buf);
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf.truncate(end);
    String::from_utf8(buf).ok()
}

/// Returns the ports of the netdevsim device with the given ID, ordered by
/// port ordinal. An unknown device has no ports.
#[must_use]
pub fn port_names(entries: &[PortEntry], id: u32) -> Vec<PortEntry> {
    let device = format!("{NETDEVSIM_DEVICE_PREFIX}{id}");
    let mut ports: Vec<PortEntry> = entries
        .iter()
        .filter(|e| e.bus == NETDEVSIM_BUS && e.device == device)
        .cloned()
        .collect();
    ports.sort_by_key(|e| e.port);
    ports
}

/// Returns the ports of the netdevsim device with the given ID, requiring
/// exactly the ordinals `0..expected`.
///
/// # Errors
///
/// Returns a [`TempnetError::Create`] naming the device ID if ports are
/// missing, duplicated, or not numbered contiguously from zero.
pub fn device_ports(entries: &[PortEntry], id: u32, expected: u32) -> Result<Vec<PortEntry>> {
    let ports = port_names(entries, id);
    let contiguous = ports.len() == expected as usize
        && ports.iter().zip(0..).all(|(entry, ordinal)| entry.port == ordinal);
    if !contiguous {
        let found: Vec<u32> = ports.iter().map(|e| e.port).collect();
        return Err(TempnetError::Create {
            kind: "netdevsim".into(),
            id: format!("with ID {id}"),
            reason: format!("expected ports 0..{expected}, found {found:?}"),
        });
    }
    Ok(ports)
}
