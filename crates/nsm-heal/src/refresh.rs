//! Client-side lease refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;

use nsm_chain::{Chain, ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

/// Re-issues a connection's request when its lease approaches expiry.
///
/// On every successful Request the stage reads the expiry from the
/// connection's current path segment and arms a timer for `expiry - now`.
/// The timer task runs detached from the caller's lifetime, so the original
/// RPC returning (or being cancelled) does not stop scheduled refreshes.
/// The refresh request traverses the full bound chain; success re-arms the
/// timer through this stage, while a failed refresh is logged and re-tried
/// at the same cadence. Close cancels the pending timer.
pub struct Refresh {
    chain: Arc<OnceCell<Chain>>,
    timers: Arc<DashMap<String, JoinHandle<()>>>,
}

impl Refresh {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(OnceCell::new()),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Binds the composed chain the refresh requests will traverse. Called
    /// once, after composition.
    pub fn bind(&self, chain: Chain) {
        // Re-binding is ignored; the first chain wins.
        let _ = self.chain.set(chain);
    }

    /// Number of armed refresh timers.
    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    fn arm(&self, conn: &Connection, request: NetworkServiceRequest) {
        let expiry = match conn.current_expiry() {
            Some(expiry) => expiry,
            None => return,
        };
        let chain = match self.chain.get() {
            Some(chain) => chain.clone(),
            None => return,
        };
        let delay = (expiry - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut refresh_request = request;
        refresh_request.connection = conn.clone();

        let id = conn.id.clone();
        let connection_id = id.clone();
        let task = tokio::spawn(async move {
            let mut wait = delay;
            loop {
                tokio::time::sleep(wait).await;
                let mut ctx = ChainContext::new();
                match chain.request(&mut ctx, refresh_request.clone()).await {
                    // Success re-armed a fresh timer through this stage.
                    Ok(_) => break,
                    Err(err) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            error = %err,
                            "refresh failed, keeping cadence"
                        );
                        wait = delay.max(Duration::from_millis(1));
                    }
                }
            }
        });
        if let Some(previous) = self.timers.insert(id, task) {
            previous.abort();
        }
    }

    fn disarm(&self, connection_id: &str) {
        if let Some((_, task)) = self.timers.remove(connection_id) {
            task.abort();
        }
    }
}

impl Default for Refresh {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Refresh {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

#[async_trait]
impl NetworkServiceStage for Refresh {
    fn name(&self) -> &str {
        "refresh"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let original = request.clone();
        let conn = next.request(ctx, request).await?;
        // A re-keyed connection would leave a timer behind under the old id.
        if conn.id != original.connection.id {
            self.disarm(&original.connection.id);
        }
        self.arm(&conn, original);
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        self.disarm(&connection.id);
        next.close(ctx, connection).await
    }
}
