//! Mechanism negotiation stages for the NSM control plane.
//!
//! One stage per mechanism family appends its dataplane configuration
//! fragments to the per-request [`ChainContext`](nsm_chain::ChainContext)
//! after the downstream chain has negotiated the connection:
//!
//! - [`KernelStage`]: kernel interfaces, tap or vethpair strategy chosen at
//!   startup from host capabilities
//! - [`MemifStage`]: shared-memory interfaces with terminating-side master
//!   election
//! - [`VxlanStage`]: vxlan tunnel endpoints with perspective-correct address
//!   ordering
//!
//! [`MechanismSelect`] runs ahead of them on the server side and pins the
//! single mechanism the request will use.

pub mod capabilities;
mod kernel;
mod memif;
pub mod netns;
mod select;
mod vxlan;

pub use capabilities::{kernel_strategy, KernelStrategy, ALLOW_VHOST_ENV};
pub use kernel::KernelStage;
pub use memif::MemifStage;
pub use select::MechanismSelect;
pub use vxlan::VxlanStage;
