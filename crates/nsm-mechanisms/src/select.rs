//! Mechanism preference selection.

use async_trait::async_trait;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, MechanismType, NetworkServiceRequest};

/// Picks exactly one mechanism preference the local side supports.
///
/// Preferences are scanned in order; the first whose type this component
/// supports and which passes validation is installed on the connection,
/// and the rest are discarded before the request continues downstream.
/// When a mechanism is already negotiated on the connection, the stage
/// leaves it alone.
pub struct MechanismSelect {
    supported: Vec<MechanismType>,
}

impl MechanismSelect {
    pub fn new(supported: Vec<MechanismType>) -> Self {
        Self { supported }
    }

    /// Selector for a same-host hop: kernel interfaces and memif.
    pub fn local() -> Self {
        Self::new(vec![
            MechanismType::KernelInterface,
            MechanismType::MemInterface,
        ])
    }

    /// Selector for a cross-host hop: vxlan tunnels.
    pub fn remote() -> Self {
        Self::new(vec![MechanismType::VxlanTunnel])
    }
}

#[async_trait]
impl NetworkServiceStage for MechanismSelect {
    fn name(&self) -> &str {
        "mechanism-select"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        if request.connection.mechanism.is_none() {
            let selected = request
                .mechanism_preferences
                .iter()
                .find(|m| self.supported.contains(&m.mechanism_type) && m.is_valid())
                .cloned();
            match selected {
                Some(mechanism) => {
                    tracing::debug!(
                        connection_id = %request.connection.id,
                        mechanism = %mechanism.mechanism_type,
                        "mechanism selected"
                    );
                    request.connection.mechanism = Some(mechanism);
                }
                None => {
                    return Err(ChainError::no_mechanism_agreed(request.connection.id.clone()));
                }
            }
        }
        request.mechanism_preferences.clear();
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use nsm_chain::Chain;
    use nsm_model::Mechanism;

    use super::*;

    fn kernel_preference() -> Mechanism {
        Mechanism::kernel("nsm0", "", 4026531993).unwrap()
    }

    fn memif_preference() -> Mechanism {
        Mechanism::memif("memif0", "", "memif.sock").unwrap()
    }

    async fn run(request: NetworkServiceRequest, stage: MechanismSelect) -> Result<Connection, ChainError> {
        let chain = Chain::new(vec![Arc::new(stage)]);
        let mut ctx = ChainContext::new();
        chain.request(&mut ctx, request).await
    }

    #[tokio::test]
    async fn test_picks_first_supported_preference() {
        let request = NetworkServiceRequest::new(Connection::new("c1", "svc"))
            .with_preference(memif_preference())
            .with_preference(kernel_preference());

        let conn = run(request, MechanismSelect::local()).await.unwrap();
        let mechanism = conn.mechanism.unwrap();
        assert_eq!(mechanism.mechanism_type, MechanismType::MemInterface);
    }

    #[tokio::test]
    async fn test_skips_unsupported_types() {
        let request = NetworkServiceRequest::new(Connection::new("c1", "svc"))
            .with_preference(memif_preference())
            .with_preference(kernel_preference());

        let conn = run(
            request,
            MechanismSelect::new(vec![MechanismType::KernelInterface]),
        )
        .await
        .unwrap();
        let mechanism = conn.mechanism.unwrap();
        assert_eq!(mechanism.mechanism_type, MechanismType::KernelInterface);
    }

    #[tokio::test]
    async fn test_no_agreement_fails() {
        let request = NetworkServiceRequest::new(Connection::new("c1", "svc"))
            .with_preference(memif_preference());

        let err = run(request, MechanismSelect::remote()).await.unwrap_err();
        assert_eq!(err, ChainError::no_mechanism_agreed("c1"));
    }

    #[tokio::test]
    async fn test_existing_mechanism_untouched() {
        let mut conn = Connection::new("c1", "svc");
        conn.mechanism = Some(kernel_preference());
        let request = NetworkServiceRequest::new(conn).with_preference(memif_preference());

        let conn = run(request, MechanismSelect::local()).await.unwrap();
        assert_eq!(
            conn.mechanism.unwrap().mechanism_type,
            MechanismType::KernelInterface
        );
    }
}
