//! Per-hop connection identity assignment.

use async_trait::async_trait;
use uuid::Uuid;

use nsm_model::{Connection, NetworkServiceRequest};

use crate::context::ChainContext;
use crate::error::ChainError;
use crate::stage::{NetworkServiceStage, Next};

/// Regenerates the connection id when the request crosses an identity
/// boundary.
///
/// The path segment at the current index is compared against this
/// component: a fresh uuid is minted only when the recorded name differs
/// from the local name AND the recorded id differs from the connection's
/// current id. A hop that matches on either axis keeps the id stable, which
/// is what lets a heal re-request traverse the same managers without
/// re-keying at every hop. Placed before the path-advance stage, so the
/// inspected segment is still the previous hop's.
pub struct SetId {
    name: String,
}

impl SetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NetworkServiceStage for SetId {
    fn name(&self) -> &str {
        "set-id"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = &mut request.connection;
        if let Some(segment) = conn.path.current_segment() {
            if segment.name != self.name && segment.id != conn.id {
                conn.id = Uuid::new_v4().to_string();
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
