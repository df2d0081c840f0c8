//! Shared-memory (memif) mechanism stage.

use std::path::PathBuf;

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{
    Connection, MechanismType, NetworkServiceRequest, Side, VppInterface, VppLink,
};

use crate::kernel::short_id;

/// Realizes a MEM_INTERFACE hop.
///
/// The destination side is master exactly when it terminates the connection
/// (the endpoint owns the socket); the source side is master only on
/// pass-through hops. The socket path joins the forwarder's base directory
/// with the mechanism-supplied relative filename.
pub struct MemifStage {
    side: Side,
    terminate: bool,
    base_dir: PathBuf,
}

impl MemifStage {
    /// Pass-through hop.
    pub fn new(side: Side, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            side,
            terminate: false,
            base_dir: base_dir.into(),
        }
    }

    /// Hop that terminates the connection on this side.
    pub fn terminating(side: Side, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            side,
            terminate: true,
            base_dir: base_dir.into(),
        }
    }

    fn is_master(&self) -> bool {
        (self.side == Side::Destination) == self.terminate
    }
}

#[async_trait]
impl NetworkServiceStage for MemifStage {
    fn name(&self) -> &str {
        "memif"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;

        let mechanism = match &conn.mechanism {
            Some(m) if m.mechanism_type == MechanismType::MemInterface => m,
            _ => return Ok(conn),
        };

        let socket = self.base_dir.join(mechanism.socket_filename());
        let context = conn.context.clone().unwrap_or_default();
        let (prefix, ip_addr) = match self.side {
            Side::Source => ("SRC", context.ip.src_ip_addr),
            Side::Destination => ("DST", context.ip.dst_ip_addr),
        };
        let ip_addresses = if self.terminate && !ip_addr.is_empty() {
            vec![ip_addr]
        } else {
            vec![]
        };

        ctx.dataplane_config.vpp_interfaces.push(VppInterface {
            name: format!("{}-{}", prefix, short_id(&conn.id)),
            enabled: true,
            ip_addresses,
            link: VppLink::Memif {
                master: self.is_master(),
                socket_filename: socket.display().to_string(),
            },
        });
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
    use nsm_model::{ConnectionContext, Mechanism};

    use super::*;

    fn memif_connection() -> Connection {
        let mut conn = Connection::new("abcdef12-7890", "svc");
        conn.mechanism = Some(Mechanism::memif("memif0", "", "memif.sock").unwrap());
        let mut context = ConnectionContext::default();
        context.ip.src_ip_addr = "10.20.1.1/30".to_string();
        context.ip.dst_ip_addr = "10.20.1.2/30".to_string();
        conn.context = Some(context);
        conn
    }

    async fn run(stage: MemifStage) -> ChainContext {
        let chain = Chain::new(vec![Arc::new(stage) as Arc<dyn NetworkServiceStage>]);
        let mut ctx = ChainContext::new();
        chain
            .request(&mut ctx, NetworkServiceRequest::new(memif_connection()))
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_terminating_destination_is_master() {
        let ctx = run(MemifStage::terminating(Side::Destination, "/run/nsm")).await;
        let vpp = &ctx.dataplane_config.vpp_interfaces[0];
        assert_eq!(vpp.name, "DST-abcdef12");
        assert_eq!(vpp.ip_addresses, vec!["10.20.1.2/30"]);
        assert_eq!(
            vpp.link,
            VppLink::Memif {
                master: true,
                socket_filename: "/run/nsm/memif.sock".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_pass_through_destination_is_slave() {
        let ctx = run(MemifStage::new(Side::Destination, "/run/nsm")).await;
        let vpp = &ctx.dataplane_config.vpp_interfaces[0];
        assert!(vpp.ip_addresses.is_empty());
        assert!(matches!(vpp.link, VppLink::Memif { master: false, .. }));
    }

    #[tokio::test]
    async fn test_terminating_source_is_slave() {
        let ctx = run(MemifStage::terminating(Side::Source, "/run/nsm")).await;
        let vpp = &ctx.dataplane_config.vpp_interfaces[0];
        assert_eq!(vpp.name, "SRC-abcdef12");
        assert_eq!(vpp.ip_addresses, vec!["10.20.1.1/30"]);
        assert!(matches!(vpp.link, VppLink::Memif { master: false, .. }));
    }
}
