//! Monitor-event-driven connection recovery.
//!
//! The heal client tracks every connection this process established and
//! watches a monitor event stream. A DELETE for a tracked connection (or the
//! stream going away) marks it DOWN; a recovery pass then re-issues the
//! original request for every connection not in the UP state. A connection
//! that fails to restore has its id reset to the unset sentinel so the next
//! attempt is treated as a first-time request, and the pass is repeated at a
//! fixed interval until everything is UP again. All state lives inside one
//! actor task, so event handling and recovery never race with Track/Untrack.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use nsm_chain::{Chain, ChainContext, ChainError};
use nsm_model::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionState, NetworkServiceRequest,
    UNSET_CONNECTION_ID,
};

/// Fixed delay between recovery passes while anything is still DOWN.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

enum Command {
    Track {
        request: Box<NetworkServiceRequest>,
        connection: Box<Connection>,
    },
    Untrack {
        id: String,
    },
    MarkDown {
        id: String,
    },
    Recover {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<HashMap<String, Connection>>,
    },
}

struct Tracked {
    request: NetworkServiceRequest,
    connection: Connection,
}

struct HealState {
    chain: Chain,
    table: HashMap<String, Tracked>,
}

impl HealState {
    fn mark_down(&mut self, id: &str) {
        if let Some(tracked) = self.table.get_mut(id) {
            tracked.connection.state = ConnectionState::Down;
        }
    }

    fn mark_all_down(&mut self) {
        for tracked in self.table.values_mut() {
            tracked.connection.state = ConnectionState::Down;
        }
    }

    fn any_down(&self) -> bool {
        self.table
            .values()
            .any(|t| t.connection.state == ConnectionState::Down)
    }

    /// One pass over every non-UP connection. Returns how many restored.
    async fn recover(&mut self) -> usize {
        let down: Vec<String> = self
            .table
            .iter()
            .filter(|(_, t)| t.connection.state == ConnectionState::Down)
            .map(|(id, _)| id.clone())
            .collect();

        let mut recovered = 0;
        for id in down {
            let mut tracked = match self.table.remove(&id) {
                Some(tracked) => tracked,
                None => continue,
            };
            let mut request = tracked.request.clone();
            request.connection = tracked.connection.clone();

            let mut ctx = ChainContext::new();
            match self.chain.request(&mut ctx, request).await {
                Ok(mut conn) => {
                    conn.state = ConnectionState::Up;
                    tracing::info!(old_id = %id, new_id = %conn.id, "connection healed");
                    tracked.connection = conn;
                    // Re-key under whatever id the new request came back with.
                    self.table
                        .insert(tracked.connection.id.clone(), tracked);
                    recovered += 1;
                }
                Err(err) => {
                    tracing::warn!(connection_id = %id, error = %err, "heal attempt failed");
                    // Discard the stale id so the retry is a fresh request.
                    tracked.connection.id = UNSET_CONNECTION_ID.to_string();
                    self.table.insert(id, tracked);
                }
            }
        }
        recovered
    }

    fn handle(&mut self, command: Command) -> Option<oneshot::Sender<usize>> {
        match command {
            Command::Track {
                request,
                connection,
            } => {
                let mut connection = *connection;
                connection.state = ConnectionState::Up;
                self.table.insert(
                    connection.id.clone(),
                    Tracked {
                        request: *request,
                        connection,
                    },
                );
                None
            }
            Command::Untrack { id } => {
                self.table.remove(&id);
                None
            }
            Command::MarkDown { id } => {
                self.mark_down(&id);
                None
            }
            Command::Recover { reply } => Some(reply),
            Command::Snapshot { reply } => {
                let snapshot = self
                    .table
                    .iter()
                    .map(|(id, t)| (id.clone(), t.connection.clone()))
                    .collect();
                let _ = reply.send(snapshot);
                None
            }
        }
    }
}

/// Cloneable front-end to the heal actor.
#[derive(Clone)]
pub struct HealHandle {
    tx: mpsc::Sender<Command>,
}

impl HealHandle {
    /// Starts tracking an established connection together with the request
    /// that produced it.
    pub async fn track(
        &self,
        request: NetworkServiceRequest,
        connection: Connection,
    ) -> Result<(), ChainError> {
        self.tx
            .send(Command::Track {
                request: Box::new(request),
                connection: Box::new(connection),
            })
            .await
            .map_err(|_| ChainError::shutdown("heal"))
    }

    /// Stops tracking a connection; its Close went through normally.
    pub async fn untrack(&self, id: &str) -> Result<(), ChainError> {
        self.tx
            .send(Command::Untrack { id: id.to_string() })
            .await
            .map_err(|_| ChainError::shutdown("heal"))
    }

    /// Marks a tracked connection DOWN without waiting for a monitor event.
    pub async fn mark_down(&self, id: &str) -> Result<(), ChainError> {
        self.tx
            .send(Command::MarkDown { id: id.to_string() })
            .await
            .map_err(|_| ChainError::shutdown("heal"))
    }

    /// Runs a recovery pass now and returns how many connections restored.
    pub async fn recover_now(&self) -> Result<usize, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Recover { reply })
            .await
            .map_err(|_| ChainError::shutdown("heal"))?;
        rx.await.map_err(|_| ChainError::shutdown("heal"))
    }

    /// Copy of the tracked table, keyed by tracking id.
    pub async fn connections(&self) -> Result<HashMap<String, Connection>, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ChainError::shutdown("heal"))?;
        rx.await.map_err(|_| ChainError::shutdown("heal"))
    }
}

/// Owns the heal actor task.
pub struct HealClient {
    handle: HealHandle,
    task: JoinHandle<()>,
}

impl HealClient {
    /// Spawns the heal actor.
    ///
    /// `chain` is the client chain recovery requests traverse; `events` is
    /// the monitor stream whose DELETE events mark connections DOWN.
    pub fn spawn(
        chain: Chain,
        events: mpsc::Receiver<ConnectionEvent>,
        recovery_interval: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            let mut state = HealState {
                chain,
                table: HashMap::new(),
            };
            let mut events = Some(events);
            let mut pending = false;
            // The deadline survives select iterations; command or event
            // traffic must not push the next pass out.
            let mut next_pass = Instant::now() + recovery_interval;

            loop {
                let event_stream = async {
                    match events.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    command = rx.recv() => {
                        let command = match command {
                            Some(command) => command,
                            None => break,
                        };
                        if let Some(reply) = state.handle(command) {
                            let recovered = state.recover().await;
                            let _ = reply.send(recovered);
                            next_pass = Instant::now() + recovery_interval;
                        } else if !pending && state.any_down() {
                            // First DOWN since the last pass starts the
                            // countdown.
                            next_pass = Instant::now() + recovery_interval;
                        }
                        pending = state.any_down();
                    }
                    event = event_stream => {
                        match event {
                            Some(event) => {
                                if event.kind == ConnectionEventKind::Delete {
                                    for id in event.connections.keys() {
                                        state.mark_down(id);
                                    }
                                }
                            }
                            None => {
                                // Losing the stream is indistinguishable from
                                // losing every connection it covered.
                                state.mark_all_down();
                                events = None;
                            }
                        }
                        if !pending && state.any_down() {
                            next_pass = Instant::now() + recovery_interval;
                        }
                        pending = state.any_down();
                    }
                    _ = tokio::time::sleep_until(next_pass), if pending => {
                        state.recover().await;
                        pending = state.any_down();
                        next_pass = Instant::now() + recovery_interval;
                    }
                }
            }
            tracing::debug!("heal actor stopped");
        });
        Self {
            handle: HealHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> HealHandle {
        self.handle.clone()
    }
}

impl Drop for HealClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use nsm_chain::{ChainContext, NetworkServiceStage, Next};

    use super::*;

    /// Succeeds every request, handing back a renamed connection.
    struct AlwaysRestores {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NetworkServiceStage for AlwaysRestores {
        fn name(&self) -> &str {
            "always-restores"
        }

        async fn request(
            &self,
            ctx: &mut ChainContext,
            mut request: NetworkServiceRequest,
            next: Next<'_>,
        ) -> Result<Connection, ChainError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            request.connection.id = format!("restored-{attempt}");
            next.request(ctx, request).await
        }

        async fn close(
            &self,
            ctx: &mut ChainContext,
            connection: Connection,
            next: Next<'_>,
        ) -> Result<(), ChainError> {
            next.close(ctx, connection).await
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl NetworkServiceStage for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn request(
            &self,
            _ctx: &mut ChainContext,
            _request: NetworkServiceRequest,
            _next: Next<'_>,
        ) -> Result<Connection, ChainError> {
            Err(ChainError::downstream("registry unavailable"))
        }

        async fn close(
            &self,
            _ctx: &mut ChainContext,
            _connection: Connection,
            _next: Next<'_>,
        ) -> Result<(), ChainError> {
            Ok(())
        }
    }

    fn tracked_request(id: &str) -> (NetworkServiceRequest, Connection) {
        let conn = Connection::new(id, "svc");
        (NetworkServiceRequest::new(conn.clone()), conn)
    }

    #[tokio::test]
    async fn test_down_connection_restores_and_rekeys() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![Arc::new(AlwaysRestores {
            attempts: attempts.clone(),
        }) as Arc<dyn NetworkServiceStage>]);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let client = HealClient::spawn(chain, events_rx, DEFAULT_RECOVERY_INTERVAL);
        let handle = client.handle();

        let (request, conn) = tracked_request("c1");
        handle.track(request, conn).await.unwrap();
        handle.mark_down("c1").await.unwrap();

        assert_eq!(handle.recover_now().await.unwrap(), 1);

        let table = handle.connections().await.unwrap();
        assert!(!table.contains_key("c1"));
        let restored = table.get("restored-0").unwrap();
        assert_eq!(restored.state, ConnectionState::Up);
    }

    #[tokio::test]
    async fn test_failed_heal_discards_stale_id() {
        let chain = Chain::new(vec![Arc::new(AlwaysFails) as Arc<dyn NetworkServiceStage>]);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let client = HealClient::spawn(chain, events_rx, DEFAULT_RECOVERY_INTERVAL);
        let handle = client.handle();

        let (request, conn) = tracked_request("c1");
        handle.track(request, conn).await.unwrap();
        handle.mark_down("c1").await.unwrap();

        assert_eq!(handle.recover_now().await.unwrap(), 0);

        let table = handle.connections().await.unwrap();
        let still_down = table.get("c1").unwrap();
        assert_eq!(still_down.state, ConnectionState::Down);
        assert_eq!(still_down.id, UNSET_CONNECTION_ID);
    }

    #[tokio::test]
    async fn test_delete_event_marks_down_and_interval_recovers() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![Arc::new(AlwaysRestores {
            attempts: attempts.clone(),
        }) as Arc<dyn NetworkServiceStage>]);
        let (events_tx, events_rx) = mpsc::channel(8);
        let client = HealClient::spawn(chain, events_rx, Duration::from_millis(20));
        let handle = client.handle();

        let (request, conn) = tracked_request("c1");
        handle.track(request, conn.clone()).await.unwrap();
        events_tx
            .send(ConnectionEvent::single(ConnectionEventKind::Delete, conn))
            .await
            .unwrap();

        // The interval-driven pass restores it without an explicit trigger.
        // The snapshot polling below runs faster than the recovery interval,
        // so the pass only fires if the deadline holds across actor traffic.
        let mut restored = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let table = handle.connections().await.unwrap();
            if table
                .values()
                .any(|c| c.state == ConnectionState::Up && c.id.starts_with("restored-"))
            {
                restored = true;
                break;
            }
        }
        assert!(restored);
    }

    #[tokio::test]
    async fn test_untracked_connection_is_ignored() {
        let chain = Chain::new(vec![]);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let client = HealClient::spawn(chain, events_rx, DEFAULT_RECOVERY_INTERVAL);
        let handle = client.handle();

        let (request, conn) = tracked_request("c1");
        handle.track(request, conn).await.unwrap();
        handle.untrack("c1").await.unwrap();
        handle.mark_down("c1").await.unwrap();

        assert_eq!(handle.recover_now().await.unwrap(), 0);
        assert!(handle.connections().await.unwrap().is_empty());
    }
}
