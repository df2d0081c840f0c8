//! VXLAN tunnel mechanism stage.

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{
    Connection, MechanismType, NetworkServiceRequest, Side, VppInterface, VppLink,
};

use crate::kernel::short_id;

/// Realizes a VXLAN_TUNNEL hop.
///
/// The mechanism records tunnel addresses from the client's point of view,
/// so the destination side swaps src and dst when emitting its endpoint
/// fragment.
pub struct VxlanStage {
    side: Side,
}

impl VxlanStage {
    pub fn new(side: Side) -> Self {
        Self { side }
    }
}

#[async_trait]
impl NetworkServiceStage for VxlanStage {
    fn name(&self) -> &str {
        "vxlan"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;

        let mechanism = match &conn.mechanism {
            Some(m) if m.mechanism_type == MechanismType::VxlanTunnel => m,
            _ => return Ok(conn),
        };

        let vni = mechanism.vxlan_vni()?;
        let (src_ip, dst_ip) = match self.side {
            Side::Source => (mechanism.vxlan_src_ip()?, mechanism.vxlan_dst_ip()?),
            Side::Destination => (mechanism.vxlan_dst_ip()?, mechanism.vxlan_src_ip()?),
        };

        let prefix = match self.side {
            Side::Source => "SRC",
            Side::Destination => "DST",
        };
        ctx.dataplane_config.vpp_interfaces.push(VppInterface {
            name: format!("{}-{}", prefix, short_id(&conn.id)),
            enabled: true,
            ip_addresses: vec![],
            link: VppLink::Vxlan {
                src_ip: src_ip.to_string(),
                dst_ip: dst_ip.to_string(),
                vni,
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
    use std::net::IpAddr;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::Mechanism;

    use super::*;

    fn vxlan_connection() -> Connection {
        let src: IpAddr = "192.168.10.1".parse().unwrap();
        let dst: IpAddr = "192.168.10.2".parse().unwrap();
        let mut conn = Connection::new("feedface-1234", "svc");
        conn.mechanism = Some(Mechanism::vxlan(src, dst, 42).unwrap());
        conn
    }

    async fn run(stage: VxlanStage) -> ChainContext {
        let chain = Chain::new(vec![Arc::new(stage) as Arc<dyn NetworkServiceStage>]);
        let mut ctx = ChainContext::new();
        chain
            .request(&mut ctx, NetworkServiceRequest::new(vxlan_connection()))
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_source_keeps_recorded_direction() {
        let ctx = run(VxlanStage::new(Side::Source)).await;
        assert_eq!(
            ctx.dataplane_config.vpp_interfaces[0].link,
            VppLink::Vxlan {
                src_ip: "192.168.10.1".to_string(),
                dst_ip: "192.168.10.2".to_string(),
                vni: 42,
            }
        );
    }

    #[tokio::test]
    async fn test_destination_swaps_endpoints() {
        let ctx = run(VxlanStage::new(Side::Destination)).await;
        assert_eq!(
            ctx.dataplane_config.vpp_interfaces[0].link,
            VppLink::Vxlan {
                src_ip: "192.168.10.2".to_string(),
                dst_ip: "192.168.10.1".to_string(),
                vni: 42,
            }
        );
    }
}
