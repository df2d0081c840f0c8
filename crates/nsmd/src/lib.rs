//! Network service mesh manager daemon.
//!
//! nsmd composes the chain stages into a running manager:
//! - server chain for inbound Request/Close, ending in discovery and
//!   downstream connect
//! - client chain for connections this process originates, with lease
//!   refresh and heal tracking
//! - monitor and heal actors, the forwarder agent commit stage, and the
//!   terminating-endpoint address allocation stage

pub mod authorize;
pub mod commit;
pub mod config;
pub mod endpoint;
pub mod registry;
pub mod service;

pub use authorize::{Authorize, IdentityProvider, LocalIdentity};
pub use commit::{Commit, ForwarderAgent, LoggingAgent};
pub use config::Config;
pub use endpoint::AddressAllocate;
pub use registry::{EndpointRecord, StaticRegistry};
pub use service::NsmService;
