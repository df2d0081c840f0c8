//! Negotiated connection state: IP addressing, routes, DNS and ethernet.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Address family for prefix requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    #[default]
    Ipv4,
    Ipv6,
}

/// A request for extra prefixes beyond the point-to-point addresses.
///
/// `required_number` prefixes must be allocated for the request to succeed;
/// the allocator then tries to fill up to `requested_number` on a best-effort
/// basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraPrefixRequest {
    pub addr_family: IpFamily,
    pub prefix_len: u32,
    pub required_number: u32,
    pub requested_number: u32,
}

impl ExtraPrefixRequest {
    /// Validates number and prefix-length ranges for the address family.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.required_number == 0 || self.requested_number == 0 {
            return Err(ModelError::InvalidPrefixRequest {
                reason: "required and requested numbers must be at least 1".to_string(),
            });
        }
        if self.required_number > self.requested_number {
            return Err(ModelError::InvalidPrefixRequest {
                reason: format!(
                    "required number {} exceeds requested number {}",
                    self.required_number, self.requested_number
                ),
            });
        }
        let max_len = match self.addr_family {
            IpFamily::Ipv4 => 32,
            IpFamily::Ipv6 => 128,
        };
        if self.prefix_len == 0 || self.prefix_len > max_len {
            return Err(ModelError::InvalidPrefixRequest {
                reason: format!(
                    "prefix length {} out of range for {:?}",
                    self.prefix_len, self.addr_family
                ),
            });
        }
        Ok(())
    }
}

/// A static route installed on one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination prefix in CIDR notation.
    pub prefix: String,
}

/// An IP neighbor (ARP) entry the source side should install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpNeighbor {
    pub ip: String,
    pub hardware_address: String,
}

/// IP addressing negotiated for a connection.
///
/// Addresses are CIDR strings as negotiated on the wire ("10.20.1.1/30").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpContext {
    pub src_ip_addr: String,
    pub dst_ip_addr: String,
    #[serde(default)]
    pub src_routes: Vec<Route>,
    #[serde(default)]
    pub dst_routes: Vec<Route>,
    #[serde(default)]
    pub ip_neighbors: Vec<IpNeighbor>,
    /// Prefixes the allocating endpoint must not hand out.
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
    #[serde(default)]
    pub extra_prefix_request: Vec<ExtraPrefixRequest>,
    /// Prefixes allocated in response to `extra_prefix_request`.
    #[serde(default)]
    pub extra_prefixes: Vec<String>,
}

/// DNS configuration pushed to the client side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsContext {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub search_domains: Vec<String>,
}

/// Ethernet addressing for mechanisms that carry L2.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetContext {
    pub src_mac: String,
    pub dst_mac: String,
}

impl EthernetContext {
    pub fn is_empty(&self) -> bool {
        self.src_mac.is_empty() && self.dst_mac.is_empty()
    }
}

/// Connection-specific negotiated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    #[serde(default)]
    pub ip: IpContext,
    #[serde(default)]
    pub dns: DnsContext,
    #[serde(default)]
    pub ethernet: EthernetContext,
}
