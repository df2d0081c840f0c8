//! The client-connect stage: forwards requests to the next hop.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

use crate::dial::{Dialer, PeerClient};

/// Forwards a request to the endpoint the discovery stage chose, caching
/// dialed clients per destination URL and remembering which downstream
/// connection belongs to which outer connection id so Close can be
/// correlated later.
pub struct Connect {
    dialer: Arc<dyn Dialer>,
    clients: DashMap<String, Arc<dyn PeerClient>>,
    downstream: DashMap<String, DownstreamRecord>,
}

#[derive(Clone)]
struct DownstreamRecord {
    url: String,
    connection: Connection,
}

impl Connect {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            clients: DashMap::new(),
            downstream: DashMap::new(),
        }
    }

    async fn client_for(&self, url: &str) -> Result<Arc<dyn PeerClient>, ChainError> {
        if let Some(client) = self.clients.get(url) {
            return Ok(client.clone());
        }
        let dialed = self.dialer.dial(url).await?;
        // A concurrent dial to the same URL may have won; keep the first.
        let client = self
            .clients
            .entry(url.to_string())
            .or_insert(dialed)
            .clone();
        Ok(client)
    }

    /// Number of downstream connections currently tracked.
    pub fn tracked(&self) -> usize {
        self.downstream.len()
    }
}

#[async_trait]
impl NetworkServiceStage for Connect {
    fn name(&self) -> &str {
        "connect"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let url = match &ctx.endpoint {
            Some(endpoint) => endpoint.manager_url.clone(),
            None => {
                return Err(ChainError::no_endpoint(
                    request.connection.network_service.clone(),
                ))
            }
        };

        let client = self.client_for(&url).await?;
        let downstream = client.request(request.clone()).await?;

        // The downstream hop finished negotiation: adopt its context and the
        // path segments it appended, keeping the index at the local hop.
        let local_index = request.connection.path.index;
        request.connection.context = downstream.context.clone();
        request.connection.path = downstream.path.clone();
        request.connection.path.index = local_index;
        self.downstream.insert(
            request.connection.id.clone(),
            DownstreamRecord {
                url,
                connection: downstream.clone(),
            },
        );
        ctx.downstream_connection = Some(downstream);

        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        // No record means the downstream half never existed or is already
        // gone; Close stays idempotent either way. The record is removed
        // only after the downstream close went through, so a failed attempt
        // can be retried.
        let record = self.downstream.get(&connection.id).map(|r| r.value().clone());
        if let Some(record) = record {
            let client = self.client_for(&record.url).await?;
            client.close(record.connection).await?;
            self.downstream.remove(&connection.id);
        }
        next.close(ctx, connection).await
    }
}
