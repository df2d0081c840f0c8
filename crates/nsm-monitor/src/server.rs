//! The monitor actor: connection table plus subscriber broadcast.
//!
//! All table and subscriber-list mutation happens inside one task consuming
//! a command channel, so a check-then-mutate sequence (table lookup followed
//! by removal, subscriber scan followed by prune) is a single unit of work.
//! Request/Close handlers enqueue commands without ever blocking on a slow
//! subscriber.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use nsm_chain::ChainError;
use nsm_model::{Connection, ConnectionEvent, ConnectionEventKind, MonitorScopeSelector};

/// Per-subscriber buffered event capacity. A subscriber that falls this far
/// behind is pruned rather than awaited.
const SUBSCRIBER_BUFFER: usize = 64;

enum Command {
    Subscribe {
        selector: MonitorScopeSelector,
        reply: oneshot::Sender<mpsc::Receiver<ConnectionEvent>>,
    },
    Update {
        connection: Box<Connection>,
    },
    Delete {
        connection_id: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<HashMap<String, Connection>>,
    },
}

struct Subscriber {
    selector: MonitorScopeSelector,
    tx: mpsc::Sender<ConnectionEvent>,
}

#[derive(Default)]
struct MonitorState {
    table: HashMap<String, Connection>,
    subscribers: Vec<Subscriber>,
}

impl MonitorState {
    fn subscribe(&mut self, selector: MonitorScopeSelector) -> mpsc::Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // The initial transfer goes out even when the filtered set is empty.
        let initial = ConnectionEvent {
            kind: ConnectionEventKind::InitialStateTransfer,
            connections: selector.filter(&self.table),
        };
        // A fresh channel always has room.
        let _ = tx.try_send(initial);
        self.subscribers.push(Subscriber { selector, tx });
        rx
    }

    fn broadcast(&mut self, event: &ConnectionEvent) {
        self.subscribers.retain(|subscriber| {
            let filtered = subscriber.selector.filter(&event.connections);
            if filtered.is_empty() {
                // Out-of-scope events are suppressed, not sent empty.
                return true;
            }
            let scoped = ConnectionEvent {
                kind: event.kind,
                connections: filtered,
            };
            match subscriber.tx.try_send(scoped) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(error = %err, "pruning monitor subscriber");
                    false
                }
            }
        });
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe { selector, reply } => {
                let rx = self.subscribe(selector);
                let _ = reply.send(rx);
            }
            Command::Update { connection } => {
                self.table
                    .insert(connection.id.clone(), (*connection).clone());
                self.broadcast(&ConnectionEvent::single(
                    ConnectionEventKind::Update,
                    *connection,
                ));
            }
            Command::Delete {
                connection_id,
                reply,
            } => {
                // A table miss is an idempotent no-op; nothing stale goes out.
                let deleted = match self.table.remove(&connection_id) {
                    Some(connection) => {
                        self.broadcast(&ConnectionEvent::single(
                            ConnectionEventKind::Delete,
                            connection,
                        ));
                        true
                    }
                    None => false,
                };
                let _ = reply.send(deleted);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.table.clone());
            }
        }
    }
}

/// Cloneable front-end enqueueing work onto the monitor actor.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
}

impl MonitorHandle {
    /// Registers a subscriber and returns its event stream. The first event
    /// is always a single INITIAL_STATE_TRANSFER with the current table.
    pub async fn subscribe(
        &self,
        selector: MonitorScopeSelector,
    ) -> Result<mpsc::Receiver<ConnectionEvent>, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { selector, reply })
            .await
            .map_err(|_| ChainError::shutdown("monitor"))?;
        rx.await.map_err(|_| ChainError::shutdown("monitor"))
    }

    /// Inserts or replaces a connection and broadcasts an UPDATE.
    pub async fn update(&self, connection: Connection) -> Result<(), ChainError> {
        self.tx
            .send(Command::Update {
                connection: Box::new(connection),
            })
            .await
            .map_err(|_| ChainError::shutdown("monitor"))
    }

    /// Removes a connection, broadcasting a DELETE when it was tracked.
    /// Returns whether a DELETE went out.
    pub async fn delete(&self, connection_id: &str) -> Result<bool, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Delete {
                connection_id: connection_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| ChainError::shutdown("monitor"))?;
        rx.await.map_err(|_| ChainError::shutdown("monitor"))
    }

    /// Copy of the current table.
    pub async fn connections(&self) -> Result<HashMap<String, Connection>, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ChainError::shutdown("monitor"))?;
        rx.await.map_err(|_| ChainError::shutdown("monitor"))
    }
}

/// Owns the actor task; dropping the server stops the actor once the last
/// handle is gone.
pub struct MonitorServer {
    handle: MonitorHandle,
    task: JoinHandle<()>,
}

impl MonitorServer {
    /// Spawns the monitor actor on the current runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let task = tokio::spawn(async move {
            let mut state = MonitorState::default();
            while let Some(command) = rx.recv().await {
                state.handle(command);
            }
            tracing::debug!("monitor actor stopped");
        });
        Self {
            handle: MonitorHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }
}

impl Drop for MonitorServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use nsm_model::PathSegment;

    use super::*;

    fn conn_via(id: &str, manager: &str) -> Connection {
        let mut conn = Connection::new(id, "svc");
        conn.path.segments.push(PathSegment {
            name: manager.to_string(),
            id: id.to_string(),
            ..Default::default()
        });
        conn
    }

    #[tokio::test]
    async fn test_subscribe_update_delete_scenario() {
        let server = MonitorServer::spawn();
        let handle = server.handle();

        let mut events = handle.subscribe(MonitorScopeSelector::all()).await.unwrap();
        let initial = events.recv().await.unwrap();
        assert_eq!(initial.kind, ConnectionEventKind::InitialStateTransfer);
        assert!(initial.connections.is_empty());

        handle.update(conn_via("c1", "nsmgr-a")).await.unwrap();
        let update = events.recv().await.unwrap();
        assert_eq!(update.kind, ConnectionEventKind::Update);
        assert_eq!(update.connections.len(), 1);
        assert!(update.connections.contains_key("c1"));

        assert!(handle.delete("c1").await.unwrap());
        let delete = events.recv().await.unwrap();
        assert_eq!(delete.kind, ConnectionEventKind::Delete);
        assert!(delete.connections.contains_key("c1"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MonitorServer::spawn();
        let handle = server.handle();
        let mut events = handle.subscribe(MonitorScopeSelector::all()).await.unwrap();
        let _ = events.recv().await.unwrap();

        handle.update(conn_via("c1", "nsmgr-a")).await.unwrap();
        let _ = events.recv().await.unwrap();
        assert!(handle.delete("c1").await.unwrap());
        let _ = events.recv().await.unwrap();

        // Second delete: no event, no error.
        assert!(!handle.delete("c1").await.unwrap());
        assert!(handle.connections().await.unwrap().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_initial_transfer_carries_current_table() {
        let server = MonitorServer::spawn();
        let handle = server.handle();
        handle.update(conn_via("c1", "nsmgr-a")).await.unwrap();
        handle.update(conn_via("c2", "nsmgr-b")).await.unwrap();

        let mut events = handle.subscribe(MonitorScopeSelector::all()).await.unwrap();
        let initial = events.recv().await.unwrap();
        assert_eq!(initial.kind, ConnectionEventKind::InitialStateTransfer);
        assert_eq!(initial.connections.len(), 2);
    }

    #[tokio::test]
    async fn test_selector_scopes_events() {
        let server = MonitorServer::spawn();
        let handle = server.handle();

        let mut events = handle
            .subscribe(MonitorScopeSelector::scoped(["nsmgr-a"]))
            .await
            .unwrap();
        let _ = events.recv().await.unwrap();

        // Out-of-scope update is suppressed entirely.
        handle.update(conn_via("c2", "nsmgr-b")).await.unwrap();
        handle.update(conn_via("c1", "nsmgr-a")).await.unwrap();

        let update = events.recv().await.unwrap();
        assert_eq!(update.kind, ConnectionEventKind::Update);
        assert_eq!(update.connections.len(), 1);
        assert!(update.connections.contains_key("c1"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_pruned_not_awaited() {
        let server = MonitorServer::spawn();
        let handle = server.handle();

        // Subscribe and never drain.
        let _events = handle.subscribe(MonitorScopeSelector::all()).await.unwrap();
        for i in 0..SUBSCRIBER_BUFFER + 8 {
            handle.update(conn_via(&format!("c{i}"), "nsmgr-a")).await.unwrap();
        }

        // The actor stayed live and the table kept every update.
        let table = handle.connections().await.unwrap();
        assert_eq!(table.len(), SUBSCRIBER_BUFFER + 8);
    }
}
