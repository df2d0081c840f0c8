//! Next-chain runtime for the NSM control plane.
//!
//! Request and Close processing is organized as an ordered chain of stages,
//! each implementing [`NetworkServiceStage`]. Composition hands every stage a
//! [`Next`] handle bound to the stages after it, so a stage decides whether
//! to delegate downstream, mutate the request first, or short-circuit. The
//! crate also carries the two path-keeping stages every server chain starts
//! with:
//!
//! - [`UpdatePath`]: advances the per-hop path index and records this
//!   component's identity in the connection path
//! - [`SetId`]: regenerates the connection id when the request crosses an
//!   identity boundary

mod context;
mod error;
mod setid;
mod stage;
mod trace;
mod updatepath;

pub use context::{ChainContext, DiscoveredEndpoint};
pub use error::ChainError;
pub use setid::SetId;
pub use stage::{Chain, NetworkServiceStage, Next};
pub use updatepath::UpdatePath;
