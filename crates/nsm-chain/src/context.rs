//! Per-request scratch state shared across chain stages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use nsm_model::{Connection, DataplaneConfig};

/// An endpoint candidate chosen by the discovery stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub name: String,
    pub network_service: String,
    pub labels: HashMap<String, String>,
    /// URL of the manager serving this endpoint; the connect stage dials it.
    pub manager_url: String,
}

/// Mutable scratch state threaded through one Request/Close traversal.
///
/// Stages communicate through named fields instead of an untyped bag: the
/// mechanism stages append [`DataplaneConfig`] fragments, discovery records
/// the chosen endpoint, and the connect stage stores the downstream
/// connection it obtained so later stages (and the commit stage) can read it.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    /// Configuration fragments accumulated for the forwarder agent.
    pub dataplane_config: DataplaneConfig,
    /// Endpoint selected by the discovery stage, if any.
    pub endpoint: Option<DiscoveredEndpoint>,
    /// Connection returned by the downstream hop, if the connect stage ran.
    pub downstream_connection: Option<Connection>,
    /// Caller-supplied deadline for this traversal.
    pub deadline: Option<DateTime<Utc>>,
}

impl ChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying a caller deadline.
    pub fn with_deadline(deadline: DateTime<Utc>) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }
}
