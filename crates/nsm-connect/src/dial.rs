//! Transport abstraction for reaching a downstream peer.
//!
//! The connect stage never speaks a wire protocol itself: a [`Dialer`]
//! produces a [`PeerClient`] for a destination URL, and the stage caches the
//! result per URL. In-process wiring (one chain calling another) and tests
//! use [`ChainPeer`] and [`StaticDialer`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use nsm_chain::{Chain, ChainContext, ChainError};
use nsm_model::{Connection, NetworkServiceRequest};

/// A connected downstream peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError>;
    async fn close(&self, connection: Connection) -> Result<(), ChainError>;
}

/// Establishes transport to a destination URL.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn PeerClient>, ChainError>;
}

/// A peer backed by an in-process chain. Each call runs with its own scratch
/// context, exactly as a remote peer would.
pub struct ChainPeer {
    chain: Chain,
}

impl ChainPeer {
    pub fn new(chain: Chain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl PeerClient for ChainPeer {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
        let mut ctx = ChainContext::new();
        self.chain.request(&mut ctx, request).await
    }

    async fn close(&self, connection: Connection) -> Result<(), ChainError> {
        let mut ctx = ChainContext::new();
        self.chain.close(&mut ctx, connection).await
    }
}

/// Dialer over a fixed URL-to-peer map.
#[derive(Default)]
pub struct StaticDialer {
    peers: HashMap<String, Arc<dyn PeerClient>>,
}

impl StaticDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, url: impl Into<String>, peer: Arc<dyn PeerClient>) -> Self {
        self.peers.insert(url.into(), peer);
        self
    }
}

#[async_trait]
impl Dialer for StaticDialer {
    async fn dial(&self, url: &str) -> Result<Arc<dyn PeerClient>, ChainError> {
        self.peers
            .get(url)
            .cloned()
            .ok_or_else(|| ChainError::dial(url, "unknown destination"))
    }
}
