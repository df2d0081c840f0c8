//! Downstream hop handling for the NSM control plane.
//!
//! [`Discovery`] chooses the endpoint a request should land on,
//! [`Connect`] dials its manager (through a pluggable [`Dialer`]) and
//! forwards the request, keeping per-URL client caches and the
//! outer-to-downstream connection correlation needed by Close.

mod connect;
mod dial;
mod discovery;

pub use connect::Connect;
pub use dial::{ChainPeer, Dialer, PeerClient, StaticDialer};
pub use discovery::{Discovery, DiscoveryClient};
