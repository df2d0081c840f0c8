//! Endpoint discovery stage.

use std::sync::Arc;

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, DiscoveredEndpoint, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

/// External registry resolving candidate endpoints for a network service.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn find_endpoints(
        &self,
        network_service: &str,
    ) -> Result<Vec<DiscoveredEndpoint>, ChainError>;
}

/// Picks the endpoint the connect stage will dial.
///
/// Candidates are filtered by label selector: every label on the request's
/// connection must be present with the same value on the candidate. The
/// first match wins and is recorded in the chain context. An endpoint
/// already chosen earlier in the traversal is left in place.
pub struct Discovery {
    client: Arc<dyn DiscoveryClient>,
}

impl Discovery {
    pub fn new(client: Arc<dyn DiscoveryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkServiceStage for Discovery {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        if ctx.endpoint.is_none() {
            let service = request.connection.network_service.clone();
            let candidates = self.client.find_endpoints(&service).await?;
            let chosen = candidates.into_iter().find(|candidate| {
                request
                    .connection
                    .labels
                    .iter()
                    .all(|(k, v)| candidate.labels.get(k) == Some(v))
            });
            match chosen {
                Some(endpoint) => {
                    tracing::debug!(
                        network_service = %service,
                        endpoint = %endpoint.name,
                        manager_url = %endpoint.manager_url,
                        "endpoint selected"
                    );
                    ctx.endpoint = Some(endpoint);
                }
                None => return Err(ChainError::no_endpoint(service)),
            }
        }
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
