//! Typed dataplane configuration fragments.
//!
//! Mechanism stages append fragments to a per-request [`DataplaneConfig`];
//! the commit stage flushes the accumulated object to the forwarder agent.
//! The shapes mirror what the agent programs (kernel interfaces, dataplane
//! interfaces, routes, ARP entries, cross connects) without committing to a
//! particular agent's schema.

use serde::{Deserialize, Serialize};

/// Which end of a connection a stage is programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    /// The opposite side.
    pub fn peer(&self) -> Side {
        match self {
            Side::Source => Side::Destination,
            Side::Destination => Side::Source,
        }
    }
}

/// Link flavor of a kernel-side interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinuxLink {
    /// Kernel half of a paired tap; `vpp_tap_name` names the dataplane half.
    Tap { vpp_tap_name: String },
    /// One end of a veth pair.
    Veth { peer_if_name: String },
}

/// A kernel interface to create, possibly inside a peer network namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxInterface {
    pub name: String,
    /// Host-visible interface name; limited to 15 characters by Linux.
    pub host_if_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub phys_address: String,
    /// Filesystem reference to the target network namespace, when the
    /// interface lands in a pod rather than the host.
    pub netns_reference: Option<String>,
    pub link: LinuxLink,
}

/// Link flavor of a dataplane-side interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VppLink {
    /// Dataplane half of a paired tap.
    Tap { version: u32 },
    /// af-packet uplink bridged onto a kernel veth.
    AfPacket { linux_interface: String },
    /// Shared memory interface.
    Memif {
        master: bool,
        socket_filename: String,
    },
    /// Vxlan tunnel endpoint.
    Vxlan {
        src_ip: String,
        dst_ip: String,
        vni: u32,
    },
}

/// A dataplane interface to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VppInterface {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub link: VppLink,
}

/// A static kernel route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxRoute {
    pub dst_network: String,
    pub outgoing_interface: String,
    pub gw_addr: String,
}

/// A static ARP entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip_address: String,
    pub interface: String,
    pub hw_address: String,
}

/// A cross connect stitching the two interfaces of a hop together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossConnect {
    pub id: String,
    pub src_interface: String,
    pub dst_interface: String,
}

/// The accumulated configuration for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataplaneConfig {
    #[serde(default)]
    pub linux_interfaces: Vec<LinuxInterface>,
    #[serde(default)]
    pub vpp_interfaces: Vec<VppInterface>,
    #[serde(default)]
    pub linux_routes: Vec<LinuxRoute>,
    #[serde(default)]
    pub arp_entries: Vec<ArpEntry>,
    #[serde(default)]
    pub cross_connects: Vec<CrossConnect>,
}

impl DataplaneConfig {
    /// True when no stage contributed any fragment.
    pub fn is_empty(&self) -> bool {
        self.linux_interfaces.is_empty()
            && self.vpp_interfaces.is_empty()
            && self.linux_routes.is_empty()
            && self.arp_entries.is_empty()
            && self.cross_connects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let mut config = DataplaneConfig::default();
        assert!(config.is_empty());

        config.vpp_interfaces.push(VppInterface {
            name: "SRC-1".to_string(),
            enabled: true,
            ip_addresses: vec![],
            link: VppLink::Tap { version: 2 },
        });
        assert!(!config.is_empty());
    }

    #[test]
    fn test_side_peer() {
        assert_eq!(Side::Source.peer(), Side::Destination);
        assert_eq!(Side::Destination.peer(), Side::Source);
    }
}
