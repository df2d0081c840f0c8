//! Server-side lease timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;

use nsm_chain::{Chain, ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

/// Expires server-side state for connections whose lease lapses without a
/// refresh.
///
/// A timer armed on every successful Request fires `expiry - now` later and
/// drives a Close through the bound chain, tearing the connection down
/// exactly as a client-initiated Close would. A refresh for the same id
/// re-arms the timer; an explicit Close cancels it.
pub struct Timeout {
    chain: Arc<OnceCell<Chain>>,
    timers: Arc<DashMap<String, JoinHandle<()>>>,
}

impl Timeout {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(OnceCell::new()),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Binds the composed chain expiry Closes will traverse.
    pub fn bind(&self, chain: Chain) {
        let _ = self.chain.set(chain);
    }

    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    fn arm(&self, conn: &Connection) {
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

        let expired = conn.clone();
        let timers = self.timers.clone();
        let id = conn.id.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove(&task_id);
            tracing::info!(connection_id = %task_id, "lease expired, closing");
            let mut ctx = ChainContext::new();
            if let Err(err) = chain.close(&mut ctx, expired).await {
                tracing::warn!(connection_id = %task_id, error = %err, "expiry close failed");
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

impl Default for Timeout {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

#[async_trait]
impl NetworkServiceStage for Timeout {
    fn name(&self) -> &str {
        "timeout"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;
        self.arm(&conn);
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
