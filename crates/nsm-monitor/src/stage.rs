//! Chain stage feeding the monitor table.

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

use crate::server::MonitorHandle;

/// Registers successful Requests in the monitor table and removes
/// connections on successful Close.
///
/// Monitor delivery problems never fail the triggering call: a gone actor is
/// logged and the caller still gets its connection.
pub struct MonitorStage {
    handle: MonitorHandle,
}

impl MonitorStage {
    pub fn new(handle: MonitorHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl NetworkServiceStage for MonitorStage {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;
        if let Err(err) = self.handle.update(conn.clone()).await {
            tracing::warn!(connection_id = %conn.id, error = %err, "monitor update dropped");
        }
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        let id = connection.id.clone();
        next.close(ctx, connection).await?;
        match self.handle.delete(&id).await {
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(connection_id = %id, error = %err, "monitor delete dropped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::{ConnectionEventKind, MonitorScopeSelector};

    use crate::server::MonitorServer;

    use super::*;

    #[tokio::test]
    async fn test_request_then_close_drives_table() {
        let server = MonitorServer::spawn();
        let handle = server.handle();
        let chain = Chain::new(vec![
            Arc::new(MonitorStage::new(handle.clone())) as Arc<dyn NetworkServiceStage>
        ]);

        let mut events = handle.subscribe(MonitorScopeSelector::all()).await.unwrap();
        let _ = events.recv().await.unwrap();

        let mut ctx = ChainContext::new();
        let conn = chain
            .request(
                &mut ctx,
                NetworkServiceRequest::new(Connection::new("c1", "svc")),
            )
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap().kind, ConnectionEventKind::Update);

        chain.close(&mut ctx, conn.clone()).await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind, ConnectionEventKind::Delete);

        // Closing again emits nothing further.
        chain.close(&mut ctx, conn).await.unwrap();
        assert!(events.try_recv().is_err());
    }
}
