//! Lease refresh and connection healing for the NSM control plane.
//!
//! Three cooperating pieces keep established connections alive:
//!
//! - [`Refresh`] (client side): re-issues a connection's request before its
//!   lease expires
//! - [`Timeout`] (server side): closes connections whose lease lapses
//!   without a refresh
//! - [`HealClient`]: watches monitor events and re-requests connections
//!   that went DOWN, retrying at a fixed interval

mod heal;
mod refresh;
mod timeout;

pub use heal::{HealClient, HealHandle, DEFAULT_RECOVERY_INTERVAL};
pub use refresh::Refresh;
pub use timeout::Timeout;
