//! Connections and the path of hops they traverse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::ConnectionContext;
use crate::mechanism::Mechanism;
use crate::ModelError;

/// Sentinel id marking a connection that must be treated as brand new on the
/// next request (used by heal after a failed restore).
pub const UNSET_CONNECTION_ID: &str = "";

/// Liveness of a connection as tracked by the monitor and heal subsystems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Up,
    Down,
}

/// One hop in a connection's path.
///
/// Each component a request traverses appends or refreshes a segment carrying
/// its identity, its component-local connection id, and the lease under which
/// it holds the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Identity of the component that owns this hop.
    pub name: String,
    /// Component-local connection id at this hop.
    pub id: String,
    /// Opaque lease token issued by the identity provider.
    pub token: String,
    /// Lease expiry; drives the refresh/timeout timers.
    pub expires: Option<DateTime<Utc>>,
}

/// The ordered record of hops a connection's request traversed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Index of the hop currently processing the request.
    /// Never exceeds `segments.len()`.
    pub index: u32,
    #[serde(default)]
    pub segments: Vec<PathSegment>,
}

impl Path {
    /// Returns the segment at the current index, if any.
    pub fn current_segment(&self) -> Option<&PathSegment> {
        self.segments.get(self.index as usize)
    }

    /// Returns the segment at the current index mutably, if any.
    pub fn current_segment_mut(&mut self) -> Option<&mut PathSegment> {
        self.segments.get_mut(self.index as usize)
    }
}

/// The central entity: a negotiated end-to-end data plane linkage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Process-unique id at the point of creation. Regenerated when an
    /// identity conflict is detected at a chain boundary.
    pub id: String,
    /// Name of the network service this connection provides.
    pub network_service: String,
    /// Transport mechanism selected for this hop, once negotiated.
    pub mechanism: Option<Mechanism>,
    /// Negotiated connection state (addresses, routes, DNS, ethernet).
    pub context: Option<ConnectionContext>,
    /// Labels used for endpoint selection.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub state: ConnectionState,
    #[serde(default)]
    pub path: Path,
}

impl Connection {
    /// Creates a connection for the named network service with a fresh
    /// (empty) path and default context.
    pub fn new(id: impl Into<String>, network_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            context: Some(ConnectionContext::default()),
            ..Default::default()
        }
    }

    /// Checks completeness: a connection can be programmed only when it has
    /// an id, a network service name, a valid mechanism and a context.
    pub fn is_complete(&self) -> Result<(), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::IncompleteConnection { field: "id" });
        }
        if self.network_service.is_empty() {
            return Err(ModelError::IncompleteConnection {
                field: "network_service",
            });
        }
        match &self.mechanism {
            None => return Err(ModelError::IncompleteConnection { field: "mechanism" }),
            Some(mechanism) => mechanism.validate()?,
        }
        if self.context.is_none() {
            return Err(ModelError::IncompleteConnection { field: "context" });
        }
        Ok(())
    }

    /// Lease expiry of the hop currently holding the connection, if set.
    pub fn current_expiry(&self) -> Option<DateTime<Utc>> {
        self.path.current_segment().and_then(|s| s.expires)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mechanism::Mechanism;

    fn complete_connection() -> Connection {
        let mut conn = Connection::new("c1", "icmp-responder");
        conn.mechanism = Some(Mechanism::kernel("nsm0", "", 12345).unwrap());
        conn
    }

    #[test]
    fn test_is_complete() {
        assert!(complete_connection().is_complete().is_ok());
    }

    #[test]
    fn test_incomplete_without_id() {
        let mut conn = complete_connection();
        conn.id = String::new();
        assert_eq!(
            conn.is_complete(),
            Err(ModelError::IncompleteConnection { field: "id" })
        );
    }

    #[test]
    fn test_incomplete_without_network_service() {
        let mut conn = complete_connection();
        conn.network_service = String::new();
        assert!(conn.is_complete().is_err());
    }

    #[test]
    fn test_incomplete_without_mechanism_or_context() {
        let mut conn = complete_connection();
        conn.mechanism = None;
        assert_eq!(
            conn.is_complete(),
            Err(ModelError::IncompleteConnection { field: "mechanism" })
        );

        let mut conn = complete_connection();
        conn.context = None;
        assert_eq!(
            conn.is_complete(),
            Err(ModelError::IncompleteConnection { field: "context" })
        );
    }

    #[test]
    fn test_invalid_mechanism_is_incomplete() {
        let mut conn = complete_connection();
        if let Some(m) = conn.mechanism.as_mut() {
            m.parameters.remove(crate::NETNS_INODE_KEY);
        }
        assert!(conn.is_complete().is_err());
    }

    #[test]
    fn test_current_segment() {
        let mut conn = Connection::new("c1", "svc");
        assert!(conn.path.current_segment().is_none());

        conn.path.segments.push(PathSegment {
            name: "nsmgr".to_string(),
            id: "c1".to_string(),
            ..Default::default()
        });
        assert_eq!(conn.path.current_segment().unwrap().name, "nsmgr");

        conn.path.index = 1;
        assert!(conn.path.current_segment().is_none());
    }
}
