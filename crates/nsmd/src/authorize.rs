//! Authorization and lease granting.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, NetworkServiceRequest};

/// Opaque identity/authorization collaborator consulted by the chain.
///
/// Certificate and token issuance mechanics live behind this trait; the
/// chain only asks whether a request may proceed and what lease token the
/// local hop should stamp on it.
pub trait IdentityProvider: Send + Sync {
    /// Rejects requests this component must not serve.
    fn authorize(&self, request: &NetworkServiceRequest) -> Result<(), ChainError>;

    /// A fresh lease token and its expiry for the local path segment.
    fn token(&self) -> (String, DateTime<Utc>);
}

/// Provider granting fixed-duration leases with opaque local tokens.
pub struct LocalIdentity {
    lease: Duration,
}

impl LocalIdentity {
    pub fn new(lease: Duration) -> Self {
        Self { lease }
    }
}

impl IdentityProvider for LocalIdentity {
    fn authorize(&self, request: &NetworkServiceRequest) -> Result<(), ChainError> {
        if request.connection.network_service.is_empty() {
            return Err(ChainError::unauthorized("request names no network service"));
        }
        Ok(())
    }

    fn token(&self) -> (String, DateTime<Utc>) {
        (Uuid::new_v4().to_string(), Utc::now() + self.lease)
    }
}

/// Chain stage enforcing authorization on entry and stamping the local
/// segment's lease on the way back out.
pub struct Authorize {
    provider: Arc<dyn IdentityProvider>,
}

impl Authorize {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NetworkServiceStage for Authorize {
    fn name(&self) -> &str {
        "authorize"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        self.provider.authorize(&request)?;
        let mut conn = next.request(ctx, request).await?;
        let (token, expires) = self.provider.token();
        if let Some(segment) = conn.path.current_segment_mut() {
            segment.token = token;
            segment.expires = Some(expires);
        }
        Ok(conn)
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::PathSegment;

    use super::*;

    fn chain() -> Chain {
        Chain::new(vec![Arc::new(Authorize::new(Arc::new(LocalIdentity::new(
            Duration::seconds(60),
        )))) as Arc<dyn NetworkServiceStage>])
    }

    #[tokio::test]
    async fn test_grants_lease_on_current_segment() {
        let mut conn = Connection::new("c1", "svc");
        conn.path.segments.push(PathSegment {
            name: "nsmgr".to_string(),
            id: "c1".to_string(),
            ..Default::default()
        });

        let mut ctx = ChainContext::new();
        let conn = chain()
            .request(&mut ctx, NetworkServiceRequest::new(conn))
            .await
            .unwrap();

        let segment = conn.path.current_segment().unwrap();
        assert!(!segment.token.is_empty());
        assert!(segment.expires.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_rejects_unnamed_service() {
        let conn = Connection::new("c1", "");
        let mut ctx = ChainContext::new();
        let err = chain()
            .request(&mut ctx, NetworkServiceRequest::new(conn))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChainError::unauthorized("request names no network service")
        );
    }
}
