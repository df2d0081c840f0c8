//! Data model for the NSM control plane.
//!
//! This crate provides the entities every other crate in the workspace
//! operates on:
//!
//! - [`Connection`]: the negotiated end-to-end linkage between a client and a
//!   network service endpoint, including its [`Path`] of per-hop segments
//! - [`Mechanism`]: the concrete transport technology realizing one hop
//!   (kernel interface, memif, vxlan) with its parameter map
//! - [`ConnectionContext`]: negotiated state (IP addressing, routes, DNS,
//!   ethernet) carried inside a connection
//! - [`NetworkServiceRequest`]: a desired connection plus the mechanism
//!   preferences the requester will accept
//! - [`ConnectionEvent`]: the monitor subscription event model
//! - [`DataplaneConfig`]: the typed configuration object mechanism stages
//!   accumulate and the commit stage flushes to the forwarder agent
//! - [`PrefixPool`]: CIDR allocation for endpoints handing out addresses

mod connection;
mod context;
mod dataplane;
mod event;
mod mechanism;
pub mod prefix_pool;
mod request;

pub use connection::{Connection, ConnectionState, Path, PathSegment, UNSET_CONNECTION_ID};
pub use context::{
    ConnectionContext, DnsContext, EthernetContext, ExtraPrefixRequest, IpContext, IpFamily,
    IpNeighbor, Route,
};
pub use dataplane::{
    ArpEntry, CrossConnect, DataplaneConfig, LinuxInterface, LinuxLink, LinuxRoute, Side,
    VppInterface, VppLink,
};
pub use event::{ConnectionEvent, ConnectionEventKind, MonitorScopeSelector};
pub use mechanism::{
    Mechanism, MechanismClass, MechanismType, INTERFACE_DESCRIPTION_KEY, INTERFACE_NAME_KEY,
    LINUX_IF_MAX_LENGTH, MEMIF_SOCKET, NETNS_INODE_KEY, SOCKET_FILENAME_KEY, VXLAN_DST_IP,
    VXLAN_SRC_IP, VXLAN_VNI, WORKSPACE_KEY,
};
pub use prefix_pool::{PrefixPool, PrefixPoolError};
pub use request::NetworkServiceRequest;

/// Validation errors for model entities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A required mechanism parameter is absent.
    #[error("mechanism type {mechanism_type} requires parameter '{parameter}'")]
    MissingParameter {
        mechanism_type: MechanismType,
        parameter: &'static str,
    },

    /// A mechanism parameter is present but unparseable.
    #[error("mechanism parameter '{parameter}' is invalid: {value}: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        value: String,
        reason: String,
    },

    /// Kernel interface names are limited to 15 characters by Linux.
    #[error("interface name '{name}' exceeds {max} characters")]
    InterfaceNameTooLong { name: String, max: usize },

    /// A connection is missing one of the fields required for completeness.
    #[error("connection is incomplete: missing {field}")]
    IncompleteConnection { field: &'static str },

    /// An extra-prefix request carries out-of-range numbers.
    #[error("invalid extra prefix request: {reason}")]
    InvalidPrefixRequest { reason: String },
}
