//! Kernel interface mechanism stage.
//!
//! Realizes a KERNEL_INTERFACE hop by appending interface fragments for the
//! forwarder agent. The strategy is fixed at process startup: with vhost-net
//! available a paired dataplane/kernel TAP is emitted, otherwise a Linux veth
//! pair with an af-packet uplink. Either way the peer's network namespace is
//! resolved from the mechanism's inode parameter before any fragment is
//! produced.

use std::path::PathBuf;

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{
    ArpEntry, Connection, LinuxInterface, LinuxLink, LinuxRoute, MechanismType,
    NetworkServiceRequest, Side, VppInterface, VppLink,
};

use crate::capabilities::{self, KernelStrategy};
use crate::netns;

pub struct KernelStage {
    side: Side,
    strategy: KernelStrategy,
    proc_root: PathBuf,
}

impl KernelStage {
    /// Stage using the process-wide strategy probe.
    pub fn new(side: Side) -> Self {
        Self::with_strategy(side, capabilities::kernel_strategy())
    }

    pub fn with_strategy(side: Side, strategy: KernelStrategy) -> Self {
        Self {
            side,
            strategy,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Overrides the proc filesystem root used for namespace resolution.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    fn append_fragments(
        &self,
        ctx: &mut ChainContext,
        conn: &Connection,
    ) -> Result<(), ChainError> {
        let mechanism = match &conn.mechanism {
            Some(m) if m.mechanism_type == MechanismType::KernelInterface => m,
            _ => return Ok(()),
        };

        let inode = mechanism.netns_inode()?;
        let netns = netns::find_namespace_under(&self.proc_root, inode)?;

        let context = conn.context.clone().unwrap_or_default();
        let (prefix, ip_addr, routes, phys_address) = match self.side {
            Side::Source => (
                "SRC",
                context.ip.src_ip_addr.clone(),
                context.ip.dst_routes.clone(),
                context.ethernet.src_mac.clone(),
            ),
            Side::Destination => (
                "DST",
                context.ip.dst_ip_addr.clone(),
                context.ip.src_routes.clone(),
                context.ethernet.dst_mac.clone(),
            ),
        };

        let vpp_name = format!("{}-{}", prefix, short_id(&conn.id));
        let host_if_name = mechanism.interface_name().to_string();
        let ip_addresses = if ip_addr.is_empty() {
            vec![]
        } else {
            vec![ip_addr.clone()]
        };

        match self.strategy {
            KernelStrategy::Tap => {
                ctx.dataplane_config.vpp_interfaces.push(VppInterface {
                    name: vpp_name.clone(),
                    enabled: true,
                    ip_addresses: vec![],
                    link: VppLink::Tap { version: 2 },
                });
                ctx.dataplane_config.linux_interfaces.push(LinuxInterface {
                    name: format!("linux-{vpp_name}"),
                    host_if_name: host_if_name.clone(),
                    enabled: true,
                    ip_addresses,
                    phys_address,
                    netns_reference: Some(netns.display().to_string()),
                    link: LinuxLink::Tap {
                        vpp_tap_name: vpp_name.clone(),
                    },
                });
            }
            KernelStrategy::VethPair => {
                let peer_name = format!("{vpp_name}-veth");
                ctx.dataplane_config.linux_interfaces.push(LinuxInterface {
                    name: format!("linux-{vpp_name}"),
                    host_if_name: host_if_name.clone(),
                    enabled: true,
                    ip_addresses,
                    phys_address,
                    netns_reference: Some(netns.display().to_string()),
                    link: LinuxLink::Veth {
                        peer_if_name: peer_name.clone(),
                    },
                });
                ctx.dataplane_config.vpp_interfaces.push(VppInterface {
                    name: vpp_name.clone(),
                    enabled: true,
                    ip_addresses: vec![],
                    link: VppLink::AfPacket {
                        linux_interface: peer_name,
                    },
                });
            }
        }

        let gateway = match self.side {
            Side::Source => host_addr(&context.ip.dst_ip_addr),
            Side::Destination => host_addr(&context.ip.src_ip_addr),
        };
        for route in routes {
            ctx.dataplane_config.linux_routes.push(LinuxRoute {
                dst_network: route.prefix,
                outgoing_interface: host_if_name.clone(),
                gw_addr: gateway.clone(),
            });
        }

        // The source side pre-seeds ARP for the peer so first packets do not
        // stall on resolution.
        if self.side == Side::Source && !context.ethernet.dst_mac.is_empty() {
            ctx.dataplane_config.arp_entries.push(ArpEntry {
                ip_address: host_addr(&context.ip.dst_ip_addr),
                interface: host_if_name,
                hw_address: context.ethernet.dst_mac,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkServiceStage for KernelStage {
    fn name(&self) -> &str {
        "kernel-interface"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;
        self.append_fragments(ctx, &conn)?;
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

/// First eight characters of a connection id, enough to keep interface names
/// within the kernel's limit.
pub(crate) fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// Strips the prefix length from a CIDR address string.
pub(crate) fn host_addr(cidr: &str) -> String {
    cidr.split('/').next().unwrap_or(cidr).to_string()
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::{ConnectionContext, Mechanism, Route};

    use super::*;

    fn fake_proc(root: &Path) -> u64 {
        let ns_dir = root.join("4242").join("ns");
        std::fs::create_dir_all(&ns_dir).unwrap();
        let net = ns_dir.join("net");
        std::fs::write(&net, b"").unwrap();
        std::os::unix::fs::MetadataExt::ino(&std::fs::metadata(&net).unwrap())
    }

    fn kernel_connection(inode: u64) -> Connection {
        let mut conn = Connection::new("abcdef12-3456", "svc");
        conn.mechanism = Some(Mechanism::kernel("nsm0", "", inode).unwrap());
        let mut context = ConnectionContext::default();
        context.ip.src_ip_addr = "10.20.1.1/30".to_string();
        context.ip.dst_ip_addr = "10.20.1.2/30".to_string();
        context.ip.dst_routes = vec![Route {
            prefix: "10.20.1.8/29".to_string(),
        }];
        context.ethernet.dst_mac = "aa:bb:cc:dd:ee:ff".to_string();
        conn.context = Some(context);
        conn
    }

    async fn run(stage: KernelStage, conn: Connection) -> Result<ChainContext, ChainError> {
        let chain = Chain::new(vec![Arc::new(stage) as Arc<dyn NetworkServiceStage>]);
        let mut ctx = ChainContext::new();
        chain
            .request(&mut ctx, NetworkServiceRequest::new(conn))
            .await?;
        Ok(ctx)
    }

    #[tokio::test]
    async fn test_tap_strategy_emits_paired_taps() {
        let dir = tempfile::tempdir().unwrap();
        let inode = fake_proc(dir.path());
        let stage = KernelStage::with_strategy(Side::Source, KernelStrategy::Tap)
            .with_proc_root(dir.path());

        let ctx = run(stage, kernel_connection(inode)).await.unwrap();
        assert_eq!(ctx.dataplane_config.vpp_interfaces.len(), 1);
        assert_eq!(
            ctx.dataplane_config.vpp_interfaces[0].link,
            VppLink::Tap { version: 2 }
        );
        let linux = &ctx.dataplane_config.linux_interfaces[0];
        assert_eq!(linux.host_if_name, "nsm0");
        assert_eq!(linux.ip_addresses, vec!["10.20.1.1/30"]);
        assert_eq!(
            linux.link,
            LinuxLink::Tap {
                vpp_tap_name: "SRC-abcdef12".to_string()
            }
        );
        assert!(linux.netns_reference.is_some());
    }

    #[tokio::test]
    async fn test_veth_strategy_emits_afpacket_uplink() {
        let dir = tempfile::tempdir().unwrap();
        let inode = fake_proc(dir.path());
        let stage = KernelStage::with_strategy(Side::Destination, KernelStrategy::VethPair)
            .with_proc_root(dir.path());

        let ctx = run(stage, kernel_connection(inode)).await.unwrap();
        let vpp = &ctx.dataplane_config.vpp_interfaces[0];
        assert_eq!(
            vpp.link,
            VppLink::AfPacket {
                linux_interface: "DST-abcdef12-veth".to_string()
            }
        );
        let linux = &ctx.dataplane_config.linux_interfaces[0];
        assert_eq!(linux.ip_addresses, vec!["10.20.1.2/30"]);
        // Destination installs no ARP entry.
        assert!(ctx.dataplane_config.arp_entries.is_empty());
    }

    #[tokio::test]
    async fn test_source_installs_route_and_arp() {
        let dir = tempfile::tempdir().unwrap();
        let inode = fake_proc(dir.path());
        let stage = KernelStage::with_strategy(Side::Source, KernelStrategy::Tap)
            .with_proc_root(dir.path());

        let ctx = run(stage, kernel_connection(inode)).await.unwrap();
        assert_eq!(
            ctx.dataplane_config.linux_routes,
            vec![LinuxRoute {
                dst_network: "10.20.1.8/29".to_string(),
                outgoing_interface: "nsm0".to_string(),
                gw_addr: "10.20.1.2".to_string(),
            }]
        );
        assert_eq!(
            ctx.dataplane_config.arp_entries,
            vec![ArpEntry {
                ip_address: "10.20.1.2".to_string(),
                interface: "nsm0".to_string(),
                hw_address: "aa:bb:cc:dd:ee:ff".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_namespace_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let stage = KernelStage::with_strategy(Side::Source, KernelStrategy::Tap)
            .with_proc_root(dir.path());

        let err = run(stage, kernel_connection(u64::MAX)).await.unwrap_err();
        assert_eq!(err, ChainError::namespace_not_found(u64::MAX));
    }

    #[tokio::test]
    async fn test_other_mechanism_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let stage = KernelStage::with_strategy(Side::Source, KernelStrategy::Tap)
            .with_proc_root(dir.path());
        let mut conn = Connection::new("c1", "svc");
        conn.mechanism = Some(Mechanism::memif("memif0", "", "memif.sock").unwrap());

        let ctx = run(stage, conn).await.unwrap();
        assert!(ctx.dataplane_config.is_empty());
    }
}
