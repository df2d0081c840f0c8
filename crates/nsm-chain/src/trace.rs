//! Per-stage tracing decorator applied at chain composition time.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use nsm_model::{Connection, NetworkServiceRequest};

use crate::context::ChainContext;
use crate::error::ChainError;
use crate::stage::{NetworkServiceStage, Next};

/// Wraps a stage so every Request/Close runs inside a named span and
/// failures are logged with the stage that raised them.
pub(crate) struct Traced {
    inner: Arc<dyn NetworkServiceStage>,
}

impl Traced {
    pub(crate) fn new(inner: Arc<dyn NetworkServiceStage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl NetworkServiceStage for Traced {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let span = tracing::debug_span!(
            "request",
            stage = self.inner.name(),
            connection_id = %request.connection.id,
        );
        let result = self.inner.request(ctx, request, next).instrument(span).await;
        if let Err(ref err) = result {
            tracing::warn!(stage = self.inner.name(), error = %err, "request failed");
        }
        result
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        let span = tracing::debug_span!(
            "close",
            stage = self.inner.name(),
            connection_id = %connection.id,
        );
        let result = self.inner.close(ctx, connection, next).instrument(span).await;
        if let Err(ref err) = result {
            tracing::warn!(stage = self.inner.name(), error = %err, "close failed");
        }
        result
    }
}
