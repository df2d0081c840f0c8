//! Monitor subscription event model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::connection::Connection;

/// Kind of a monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    /// Full table snapshot, sent exactly once per subscriber at subscribe
    /// time.
    InitialStateTransfer,
    /// One or more connections were created or replaced.
    Update,
    /// One or more connections were removed.
    Delete,
}

/// A monitor event: the kind plus the affected connections keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub connections: HashMap<String, Connection>,
}

impl ConnectionEvent {
    /// Builds a single-connection event of the given kind.
    pub fn single(kind: ConnectionEventKind, connection: Connection) -> Self {
        let mut connections = HashMap::new();
        connections.insert(connection.id.clone(), connection);
        Self { kind, connections }
    }
}

/// Narrows which connections a subscriber receives.
///
/// A connection matches when the selector is empty, or when any of its path
/// segments carries one of the selected component names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorScopeSelector {
    #[serde(default)]
    pub path_segment_names: Vec<String>,
}

impl MonitorScopeSelector {
    /// Selector matching every connection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Selector scoped to connections whose path traverses any of `names`.
    pub fn scoped(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            path_segment_names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true when `connection` is visible through this selector.
    pub fn matches(&self, connection: &Connection) -> bool {
        if self.path_segment_names.is_empty() {
            return true;
        }
        connection
            .path
            .segments
            .iter()
            .any(|segment| self.path_segment_names.iter().any(|n| *n == segment.name))
    }

    /// Filters an event's connection map through this selector.
    pub fn filter(&self, connections: &HashMap<String, Connection>) -> HashMap<String, Connection> {
        connections
            .iter()
            .filter(|(_, conn)| self.matches(conn))
            .map(|(id, conn)| (id.clone(), conn.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PathSegment;

    fn conn_via(id: &str, manager: &str) -> Connection {
        let mut conn = Connection::new(id, "svc");
        conn.path.segments.push(PathSegment {
            name: manager.to_string(),
            id: id.to_string(),
            ..Default::default()
        });
        conn
    }

    #[test]
    fn test_empty_selector_matches_all() {
        let selector = MonitorScopeSelector::all();
        assert!(selector.matches(&conn_via("c1", "nsmgr-a")));
        assert!(selector.matches(&Connection::new("c2", "svc")));
    }

    #[test]
    fn test_scoped_selector() {
        let selector = MonitorScopeSelector::scoped(["nsmgr-a"]);
        assert!(selector.matches(&conn_via("c1", "nsmgr-a")));
        assert!(!selector.matches(&conn_via("c2", "nsmgr-b")));
    }

    #[test]
    fn test_filter_drops_unmatched() {
        let selector = MonitorScopeSelector::scoped(["nsmgr-a"]);
        let mut table = HashMap::new();
        table.insert("c1".to_string(), conn_via("c1", "nsmgr-a"));
        table.insert("c2".to_string(), conn_via("c2", "nsmgr-b"));

        let filtered = selector.filter(&table);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("c1"));
    }
}
