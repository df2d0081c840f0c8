//! Terminating-endpoint address allocation.

use std::sync::Arc;

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::prefix_pool::{PrefixPool, PrefixPoolError};
use nsm_model::{Connection, IpFamily, NetworkServiceRequest};

/// Hands out point-to-point addresses (and requested extra prefixes) from a
/// [`PrefixPool`], the way an address-providing endpoint answers a request.
///
/// Allocation happens on the way in so deeper stages see the final IP
/// context; a downstream failure releases the allocation again. Ranges the
/// request's context marks as excluded are withheld from the pool for the
/// duration of the extraction. Close returns the connection's prefixes to
/// the pool and tolerates an id the pool never saw.
pub struct AddressAllocate {
    pool: Arc<PrefixPool>,
}

impl AddressAllocate {
    pub fn new(pool: Arc<PrefixPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NetworkServiceStage for AddressAllocate {
    fn name(&self) -> &str {
        "address-allocate"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = &mut request.connection;
        let mut context = conn.context.take().unwrap_or_default();
        let family = context
            .ip
            .extra_prefix_request
            .first()
            .map(|r| r.addr_family)
            .unwrap_or(IpFamily::Ipv4);

        let withheld = self
            .pool
            .exclude_prefixes(&context.ip.excluded_prefixes)
            .map_err(|e| ChainError::prefix_pool(e.to_string()))?;
        let allocation = self
            .pool
            .extract(&conn.id, family, &context.ip.extra_prefix_request);
        if let Err(err) = self.pool.release_excluded_prefixes(&withheld) {
            tracing::warn!(connection_id = %conn.id, error = %err, "restoring excluded prefixes failed");
        }
        let allocation = allocation.map_err(|e| ChainError::prefix_pool(e.to_string()))?;
        context.ip.src_ip_addr = allocation.src_ip_addr;
        context.ip.dst_ip_addr = allocation.dst_ip_addr;
        context.ip.extra_prefixes = allocation.extra_prefixes;
        conn.context = Some(context);

        let id = conn.id.clone();
        match next.request(ctx, request).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                if let Err(release_err) = self.pool.release(&id) {
                    tracing::warn!(connection_id = %id, error = %release_err, "rollback release failed");
                }
                Err(err)
            }
        }
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        match self.pool.release(&connection.id) {
            Ok(()) | Err(PrefixPoolError::UnknownConnection { .. }) => {}
            Err(err) => return Err(ChainError::prefix_pool(err.to_string())),
        }
        next.close(ctx, connection).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::{ConnectionContext, ExtraPrefixRequest};

    use super::*;

    fn allocating_chain(pool: &Arc<PrefixPool>) -> Chain {
        Chain::new(vec![
            Arc::new(AddressAllocate::new(pool.clone())) as Arc<dyn NetworkServiceStage>
        ])
    }

    #[tokio::test]
    async fn test_icmp_responder_scenario() {
        let pool = Arc::new(PrefixPool::new(["10.20.1.0/24"]).unwrap());
        let chain = allocating_chain(&pool);

        let mut conn = Connection::new("c1", "icmp-responder");
        let mut context = ConnectionContext::default();
        context.ip.extra_prefix_request.push(ExtraPrefixRequest {
            addr_family: IpFamily::Ipv4,
            prefix_len: 29,
            required_number: 1,
            requested_number: 1,
        });
        conn.context = Some(context);

        let mut ctx = ChainContext::new();
        let conn = chain
            .request(&mut ctx, NetworkServiceRequest::new(conn))
            .await
            .unwrap();

        let ip = &conn.context.as_ref().unwrap().ip;
        assert_eq!(ip.src_ip_addr, "10.20.1.1/30");
        assert_eq!(ip.dst_ip_addr, "10.20.1.2/30");
        assert_eq!(ip.extra_prefixes, vec!["10.20.1.8/29"]);

        chain.close(&mut ctx, conn).await.unwrap();
        assert_eq!(pool.prefixes(), vec!["10.20.1.0/24"]);
    }

    #[tokio::test]
    async fn test_excluded_prefixes_are_avoided() {
        let pool = Arc::new(PrefixPool::new(["10.20.1.0/24"]).unwrap());
        let chain = allocating_chain(&pool);

        let mut conn = Connection::new("c1", "icmp-responder");
        let mut context = ConnectionContext::default();
        context.ip.excluded_prefixes = vec!["10.20.1.0/30".to_string()];
        conn.context = Some(context);

        let mut ctx = ChainContext::new();
        let conn = chain
            .request(&mut ctx, NetworkServiceRequest::new(conn))
            .await
            .unwrap();

        // The first /30 is off limits; the allocation lands in the next one.
        let ip = &conn.context.as_ref().unwrap().ip;
        assert_eq!(ip.src_ip_addr, "10.20.1.5/30");
        assert_eq!(ip.dst_ip_addr, "10.20.1.6/30");
        assert_eq!(ip.excluded_prefixes, vec!["10.20.1.0/30"]);

        chain.close(&mut ctx, conn).await.unwrap();
        assert_eq!(pool.prefixes(), vec!["10.20.1.0/24"]);
    }

    #[tokio::test]
    async fn test_close_of_unknown_id_is_no_op() {
        let pool = Arc::new(PrefixPool::new(["10.20.1.0/24"]).unwrap());
        let chain = allocating_chain(&pool);

        let mut ctx = ChainContext::new();
        chain
            .close(&mut ctx, Connection::new("never-seen", "svc"))
            .await
            .unwrap();
        assert_eq!(pool.prefixes(), vec!["10.20.1.0/24"]);
    }
}
