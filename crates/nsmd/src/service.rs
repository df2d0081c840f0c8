//! Top-level service wiring.
//!
//! Builds the server chain every inbound Request/Close traverses, the
//! client chain this process uses to originate connections, and the monitor
//! and heal actors behind them. Stage order in the server chain matters:
//! stages that act on the unwind (commit flush, lease grant, monitor
//! registration, timeout arming) sit ahead of the stages that produce what
//! they consume.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use async_trait::async_trait;

use nsm_chain::{
    Chain, ChainContext, ChainError, NetworkServiceStage, Next, SetId, UpdatePath,
};
use nsm_connect::{Connect, Dialer, Discovery, DiscoveryClient};
use nsm_heal::{HealClient, HealHandle, Refresh, Timeout};
use nsm_mechanisms::{KernelStage, MechanismSelect, MemifStage, VxlanStage};
use nsm_model::{
    Connection, ConnectionEvent, MonitorScopeSelector, NetworkServiceRequest, PathSegment, Side,
};
use nsm_monitor::{MonitorHandle, MonitorServer, MonitorStage};

use crate::authorize::{Authorize, IdentityProvider};
use crate::commit::{Commit, ForwarderAgent};
use crate::config::Config;

/// Terminal adapter running another chain, modeling the RPC boundary: the
/// called chain advances the path index for its own hops, and the caller
/// gets the connection back with the index rewound to its own segment.
struct Forward {
    chain: Chain,
}

impl Forward {
    fn new(chain: Chain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl NetworkServiceStage for Forward {
    fn name(&self) -> &str {
        "forward"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        _next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let entry_index = request.connection.path.index;
        let mut conn = self.chain.request(ctx, request).await?;
        conn.path.index = entry_index;
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        _next: Next<'_>,
    ) -> Result<(), ChainError> {
        self.chain.close(ctx, connection).await
    }
}

/// The manager: server chain, client chain, monitor and heal.
pub struct NsmService {
    name: String,
    server_chain: Chain,
    client_chain: Chain,
    monitor_handle: MonitorHandle,
    heal_handle: HealHandle,
    // Actor owners; dropping the service stops them.
    _monitor: MonitorServer,
    _heal: HealClient,
}

impl NsmService {
    pub async fn new(
        config: &Config,
        discovery: Arc<dyn DiscoveryClient>,
        dialer: Arc<dyn Dialer>,
        agent: Arc<dyn ForwarderAgent>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ChainError> {
        // A restarted process must not inherit half-programmed state. The
        // agent is eventually-available infrastructure: keep trying.
        loop {
            match agent.reset().await {
                Ok(()) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "forwarder reset failed, retrying");
                    tokio::time::sleep(config.recovery_interval()).await;
                }
            }
        }

        let monitor = MonitorServer::spawn();
        let monitor_handle = monitor.handle();
        let timeout = Arc::new(Timeout::new());
        let refresh = Arc::new(Refresh::new());

        // SetId inspects the previous hop's segment, so it runs before
        // UpdatePath stamps the local one over it.
        let server_chain = Chain::traced(vec![
            Arc::new(SetId::new(config.name.clone())) as Arc<dyn NetworkServiceStage>,
            Arc::new(UpdatePath::new(config.name.clone())),
            timeout.clone(),
            Arc::new(MonitorStage::new(monitor_handle.clone())),
            Arc::new(Authorize::new(identity.clone())),
            Arc::new(Commit::new(agent)),
            Arc::new(MechanismSelect::local()),
            Arc::new(KernelStage::new(Side::Source)),
            Arc::new(MemifStage::new(Side::Source, config.memif_base_dir.clone())),
            Arc::new(VxlanStage::new(Side::Source)),
            Arc::new(Discovery::new(discovery)),
            Arc::new(Connect::new(dialer)),
        ]);
        timeout.bind(server_chain.clone());

        let client_chain = Chain::traced(vec![
            refresh.clone() as Arc<dyn NetworkServiceStage>,
            Arc::new(Authorize::new(identity)),
            Arc::new(Forward::new(server_chain.clone())),
        ]);
        refresh.bind(client_chain.clone());

        let events = monitor_handle
            .subscribe(MonitorScopeSelector::all())
            .await?;
        let heal = HealClient::spawn(client_chain.clone(), events, config.recovery_interval());
        let heal_handle = heal.handle();

        Ok(Self {
            name: config.name.clone(),
            server_chain,
            client_chain,
            monitor_handle,
            heal_handle,
            _monitor: monitor,
            _heal: heal,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heal(&self) -> HealHandle {
        self.heal_handle.clone()
    }

    /// Serves an inbound Request from a peer or local workload.
    pub async fn request(
        &self,
        request: NetworkServiceRequest,
    ) -> Result<Connection, ChainError> {
        let mut ctx = ChainContext::new();
        self.server_chain.request(&mut ctx, request).await
    }

    /// Serves an inbound Close.
    pub async fn close(&self, connection: Connection) -> Result<(), ChainError> {
        let mut ctx = ChainContext::new();
        self.server_chain.close(&mut ctx, connection).await
    }

    /// Originates a connection from this process (client role): seeds the
    /// path, runs the client chain, and registers the result for healing.
    pub async fn connect(
        &self,
        mut request: NetworkServiceRequest,
    ) -> Result<Connection, ChainError> {
        let conn = &mut request.connection;
        if conn.id.is_empty() {
            conn.id = Uuid::new_v4().to_string();
        }
        if conn.path.segments.is_empty() {
            conn.path.segments.push(PathSegment {
                name: self.name.clone(),
                id: conn.id.clone(),
                ..Default::default()
            });
            conn.path.index = 0;
        }

        let mut ctx = ChainContext::new();
        let established = self.client_chain.request(&mut ctx, request.clone()).await?;
        self.heal_handle
            .track(request, established.clone())
            .await?;
        Ok(established)
    }

    /// Tears down a connection this process originated.
    pub async fn disconnect(&self, connection: Connection) -> Result<(), ChainError> {
        self.heal_handle.untrack(&connection.id).await?;
        let mut ctx = ChainContext::new();
        self.client_chain.close(&mut ctx, connection).await
    }

    /// Subscribes to connection lifecycle events.
    pub async fn monitor(
        &self,
        selector: MonitorScopeSelector,
    ) -> Result<mpsc::Receiver<ConnectionEvent>, ChainError> {
        self.monitor_handle.subscribe(selector).await
    }

    /// Copy of the current connection table.
    pub async fn connections(
        &self,
    ) -> Result<std::collections::HashMap<String, Connection>, ChainError> {
        self.monitor_handle.connections().await
    }
}
