//! Server-side path advancement.

use async_trait::async_trait;

use nsm_model::{Connection, NetworkServiceRequest, PathSegment};

use crate::context::ChainContext;
use crate::error::ChainError;
use crate::stage::{NetworkServiceStage, Next};

/// Advances the connection path by one hop and records this component in the
/// segment at the new index.
///
/// Requires `index < len(segments)` on entry; the originating client seeds
/// segment zero before the request reaches any server chain. After the
/// increment a fresh segment is appended when the index reaches the end of
/// the list, then the local component name and the connection's current id
/// are written into the segment at the new index.
pub struct UpdatePath {
    name: String,
}

impl UpdatePath {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NetworkServiceStage for UpdatePath {
    fn name(&self) -> &str {
        "update-path"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = &mut request.connection;
        let len = conn.path.segments.len();
        let index = conn.path.index as usize;
        if index >= len {
            return Err(ChainError::path_index_out_of_range(index, len));
        }

        conn.path.index += 1;
        let new_index = index + 1;
        if new_index == len {
            conn.path.segments.push(PathSegment::default());
        }

        let id = conn.id.clone();
        let segment = &mut conn.path.segments[new_index];
        segment.name.clone_from(&self.name);
        segment.id = id;

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
