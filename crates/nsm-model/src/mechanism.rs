//! Transport mechanisms and their parameter maps.
//!
//! A mechanism describes how a single hop of a connection is realized on the
//! wire: a kernel interface injected into a pod's network namespace, a shared
//! memory interface (memif), or a vxlan tunnel between nodes. Parameters are
//! a string map so new mechanism families can negotiate fields without
//! changing the envelope; the typed accessors below cover the families this
//! control plane programs.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Interface name requested inside the peer namespace.
pub const INTERFACE_NAME_KEY: &str = "name";
/// Human readable description of the interface.
pub const INTERFACE_DESCRIPTION_KEY: &str = "description";
/// Inode of the peer's network namespace, as an unsigned decimal.
pub const NETNS_INODE_KEY: &str = "netnsInode";
/// Memif socket filename, relative to the negotiated base directory.
pub const SOCKET_FILENAME_KEY: &str = "socketfile";
/// Workspace directory shared with the client pod.
pub const WORKSPACE_KEY: &str = "workspace";
/// Vxlan tunnel source IP, from the client's point of view.
pub const VXLAN_SRC_IP: &str = "src_ip";
/// Vxlan tunnel destination IP, from the client's point of view.
pub const VXLAN_DST_IP: &str = "dst_ip";
/// Vxlan network identifier (24 bit).
pub const VXLAN_VNI: &str = "vni";

/// Linux limits interface names to 15 characters.
pub const LINUX_IF_MAX_LENGTH: usize = 15;

/// Default memif socket filename joined under the per-connection directory.
pub const MEMIF_SOCKET: &str = "memif.sock";

/// Mechanism family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MechanismType {
    /// Kernel network interface (veth pair or tap) in the peer namespace.
    KernelInterface,
    /// Shared memory packet interface.
    MemInterface,
    /// Vxlan tunnel between nodes.
    VxlanTunnel,
}

impl MechanismType {
    /// Returns the class a mechanism of this type belongs to.
    pub fn class(&self) -> MechanismClass {
        match self {
            MechanismType::KernelInterface | MechanismType::MemInterface => MechanismClass::Local,
            MechanismType::VxlanTunnel => MechanismClass::Remote,
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MechanismType::KernelInterface => "KERNEL_INTERFACE",
            MechanismType::MemInterface => "MEM_INTERFACE",
            MechanismType::VxlanTunnel => "VXLAN_TUNNEL",
        };
        f.write_str(name)
    }
}

/// Whether a mechanism can cross a host boundary.
///
/// Local mechanisms only make sense over a same-host (unix domain) transport;
/// remote mechanisms carry traffic between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MechanismClass {
    Local,
    Remote,
}

/// A concrete transport mechanism for one hop of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    pub mechanism_type: MechanismType,
    pub cls: MechanismClass,
    /// String-keyed negotiation parameters. BTreeMap keeps dumps stable.
    pub parameters: BTreeMap<String, String>,
}

impl Mechanism {
    /// Creates a mechanism of the given type with no parameters.
    pub fn new(mechanism_type: MechanismType) -> Self {
        Self {
            mechanism_type,
            cls: mechanism_type.class(),
            parameters: BTreeMap::new(),
        }
    }

    /// Creates a kernel interface mechanism.
    ///
    /// `netns_inode` identifies the peer's network namespace; `name` is the
    /// interface name to create there. The result is validated, so an
    /// over-long name is rejected here rather than at programming time.
    pub fn kernel(
        name: impl Into<String>,
        description: impl Into<String>,
        netns_inode: u64,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let mut mechanism = Self::new(MechanismType::KernelInterface);
        mechanism.parameters.insert(
            SOCKET_FILENAME_KEY.to_string(),
            format!("{}/{}", name, MEMIF_SOCKET),
        );
        mechanism
            .parameters
            .insert(INTERFACE_NAME_KEY.to_string(), name);
        mechanism
            .parameters
            .insert(INTERFACE_DESCRIPTION_KEY.to_string(), description.into());
        mechanism
            .parameters
            .insert(NETNS_INODE_KEY.to_string(), netns_inode.to_string());
        mechanism.validate()?;
        Ok(mechanism)
    }

    /// Creates a memif mechanism with a socket filename relative to the
    /// forwarder's base directory.
    pub fn memif(
        name: impl Into<String>,
        description: impl Into<String>,
        socket_filename: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let mut mechanism = Self::new(MechanismType::MemInterface);
        mechanism
            .parameters
            .insert(INTERFACE_NAME_KEY.to_string(), name.into());
        mechanism
            .parameters
            .insert(INTERFACE_DESCRIPTION_KEY.to_string(), description.into());
        mechanism
            .parameters
            .insert(SOCKET_FILENAME_KEY.to_string(), socket_filename.into());
        mechanism.validate()?;
        Ok(mechanism)
    }

    /// Creates a vxlan tunnel mechanism. Addresses are recorded from the
    /// client's point of view; the server flips them when programming.
    pub fn vxlan(src_ip: IpAddr, dst_ip: IpAddr, vni: u32) -> Result<Self, ModelError> {
        let mut mechanism = Self::new(MechanismType::VxlanTunnel);
        mechanism
            .parameters
            .insert(VXLAN_SRC_IP.to_string(), src_ip.to_string());
        mechanism
            .parameters
            .insert(VXLAN_DST_IP.to_string(), dst_ip.to_string());
        mechanism
            .parameters
            .insert(VXLAN_VNI.to_string(), vni.to_string());
        mechanism.validate()?;
        Ok(mechanism)
    }

    /// Returns a parameter by key, if set.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Interface name parameter, empty string when absent.
    pub fn interface_name(&self) -> &str {
        self.parameter(INTERFACE_NAME_KEY).unwrap_or("")
    }

    /// Interface description parameter, empty string when absent.
    pub fn description(&self) -> &str {
        self.parameter(INTERFACE_DESCRIPTION_KEY).unwrap_or("")
    }

    /// Memif socket filename parameter, empty string when absent.
    pub fn socket_filename(&self) -> &str {
        self.parameter(SOCKET_FILENAME_KEY).unwrap_or("")
    }

    /// Workspace parameter, empty string when absent.
    pub fn workspace(&self) -> &str {
        self.parameter(WORKSPACE_KEY).unwrap_or("")
    }

    /// Parses the network namespace inode parameter.
    pub fn netns_inode(&self) -> Result<u64, ModelError> {
        let raw = self.parameter(NETNS_INODE_KEY).ok_or(ModelError::MissingParameter {
            mechanism_type: self.mechanism_type,
            parameter: NETNS_INODE_KEY,
        })?;
        raw.parse::<u64>().map_err(|e| ModelError::InvalidParameter {
            parameter: NETNS_INODE_KEY,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    /// Parses the vxlan source IP parameter.
    pub fn vxlan_src_ip(&self) -> Result<IpAddr, ModelError> {
        self.ip_parameter(VXLAN_SRC_IP)
    }

    /// Parses the vxlan destination IP parameter.
    pub fn vxlan_dst_ip(&self) -> Result<IpAddr, ModelError> {
        self.ip_parameter(VXLAN_DST_IP)
    }

    /// Parses the vxlan network identifier; must fit in 24 bits.
    pub fn vxlan_vni(&self) -> Result<u32, ModelError> {
        let raw = self.parameter(VXLAN_VNI).ok_or(ModelError::MissingParameter {
            mechanism_type: self.mechanism_type,
            parameter: VXLAN_VNI,
        })?;
        let vni = raw.parse::<u32>().map_err(|e| ModelError::InvalidParameter {
            parameter: VXLAN_VNI,
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        if vni >= 1 << 24 {
            return Err(ModelError::InvalidParameter {
                parameter: VXLAN_VNI,
                value: raw.to_string(),
                reason: "must be a 24-bit unsigned integer".to_string(),
            });
        }
        Ok(vni)
    }

    fn ip_parameter(&self, key: &'static str) -> Result<IpAddr, ModelError> {
        let raw = self.parameter(key).ok_or(ModelError::MissingParameter {
            mechanism_type: self.mechanism_type,
            parameter: key,
        })?;
        raw.parse::<IpAddr>().map_err(|e| ModelError::InvalidParameter {
            parameter: key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    /// Validates the mechanism against the rules for its family.
    ///
    /// Kernel interfaces need a parseable namespace inode and an interface
    /// name no longer than [`LINUX_IF_MAX_LENGTH`]; memif needs an interface
    /// name; vxlan needs parseable endpoint addresses and a 24-bit VNI.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self.mechanism_type {
            MechanismType::KernelInterface => {
                self.netns_inode()?;
                let name = self.parameter(INTERFACE_NAME_KEY).ok_or(
                    ModelError::MissingParameter {
                        mechanism_type: self.mechanism_type,
                        parameter: INTERFACE_NAME_KEY,
                    },
                )?;
                if name.len() > LINUX_IF_MAX_LENGTH {
                    return Err(ModelError::InterfaceNameTooLong {
                        name: name.to_string(),
                        max: LINUX_IF_MAX_LENGTH,
                    });
                }
            }
            MechanismType::MemInterface => {
                self.parameter(INTERFACE_NAME_KEY).ok_or(
                    ModelError::MissingParameter {
                        mechanism_type: self.mechanism_type,
                        parameter: INTERFACE_NAME_KEY,
                    },
                )?;
            }
            MechanismType::VxlanTunnel => {
                self.vxlan_src_ip()?;
                self.vxlan_dst_ip()?;
                self.vxlan_vni()?;
            }
        }
        Ok(())
    }

    /// Returns true if the mechanism passes validation.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
