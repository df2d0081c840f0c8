//! The stage trait and chain composition.
//!
//! A [`Chain`] is an ordered list of [`NetworkServiceStage`] implementations.
//! Each stage receives a [`Next`] handle bound to the stages after it;
//! calling `next.request(..)` (or `next.close(..)`) hands control to the
//! following element. Running past the last element hits the terminal
//! behavior: Request echoes back the connection it was given, Close returns
//! success. A stage that returns without calling `next` short-circuits the
//! remainder of the chain.

use std::sync::Arc;

use async_trait::async_trait;

use nsm_model::{Connection, NetworkServiceRequest};

use crate::context::ChainContext;
use crate::error::ChainError;
use crate::trace::Traced;

/// One element of a request/close processing chain.
#[async_trait]
pub trait NetworkServiceStage: Send + Sync {
    /// Short stable name used in spans and log lines.
    fn name(&self) -> &str;

    /// Handles a connection request, optionally delegating downstream.
    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError>;

    /// Handles a connection teardown, optionally delegating downstream.
    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError>;
}

/// Handle to the remainder of the chain after the current stage.
///
/// Consumed on use: a stage calls `next.request(..)` or `next.close(..)` at
/// most once per invocation.
pub struct Next<'a> {
    stages: &'a [Arc<dyn NetworkServiceStage>],
}

impl<'a> Next<'a> {
    /// Invokes the next stage's Request, or the terminal behavior when the
    /// chain is exhausted.
    pub async fn request(
        self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
    ) -> Result<Connection, ChainError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.request(ctx, request, Next { stages: rest }).await,
            None => Ok(request.connection),
        }
    }

    /// Invokes the next stage's Close, or the terminal behavior when the
    /// chain is exhausted.
    pub async fn close(
        self,
        ctx: &mut ChainContext,
        connection: Connection,
    ) -> Result<(), ChainError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.close(ctx, connection, Next { stages: rest }).await,
            None => Ok(()),
        }
    }
}

/// An ordered, cheaply cloneable composition of stages.
#[derive(Clone)]
pub struct Chain {
    stages: Arc<[Arc<dyn NetworkServiceStage>]>,
}

impl Chain {
    /// Composes `stages` into a chain, in invocation order.
    pub fn new(stages: Vec<Arc<dyn NetworkServiceStage>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Composes `stages`, wrapping each element in a tracing decorator that
    /// opens a span per stage call and logs failures.
    pub fn traced(stages: Vec<Arc<dyn NetworkServiceStage>>) -> Self {
        let wrapped = stages
            .into_iter()
            .map(|stage| Arc::new(Traced::new(stage)) as Arc<dyn NetworkServiceStage>)
            .collect();
        Self::new(wrapped)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs a Request through the whole chain.
    pub async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
    ) -> Result<Connection, ChainError> {
        Next {
            stages: &self.stages,
        }
        .request(ctx, request)
        .await
    }

    /// Runs a Close through the whole chain.
    pub async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
    ) -> Result<(), ChainError> {
        Next {
            stages: &self.stages,
        }
        .close(ctx, connection)
        .await
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Chain").field("stages", &names).finish()
    }
}
