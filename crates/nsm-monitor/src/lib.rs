//! Connection monitoring for the NSM control plane.
//!
//! [`MonitorServer`] owns the authoritative table of active connections for
//! this process and streams create/update/delete events to any number of
//! subscribers; [`MonitorStage`] is the chain element that feeds it.

mod server;
mod stage;

pub use server::{MonitorHandle, MonitorServer};
pub use stage::MonitorStage;
