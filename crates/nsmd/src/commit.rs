//! Flushing accumulated configuration to the forwarder agent.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use nsm_chain::{ChainContext, ChainError, NetworkServiceStage, Next};
use nsm_model::{Connection, DataplaneConfig, NetworkServiceRequest};

/// External process programming the actual packet forwarding.
#[async_trait]
pub trait ForwarderAgent: Send + Sync {
    /// Applies a configuration object.
    async fn update(&self, config: &DataplaneConfig) -> Result<(), ChainError>;

    /// Removes a previously applied configuration object.
    async fn delete(&self, config: &DataplaneConfig) -> Result<(), ChainError>;

    /// Clears any state left over from a previous process incarnation.
    async fn reset(&self) -> Result<(), ChainError>;
}

/// Pushes the configuration the mechanism stages accumulated.
///
/// The stage sits ahead of the mechanism stages so the flush happens on the
/// unwind, after every fragment has been appended. The applied configuration
/// is remembered per connection id so Close can hand the agent the exact
/// object to remove.
pub struct Commit {
    agent: Arc<dyn ForwarderAgent>,
    applied: DashMap<String, DataplaneConfig>,
}

impl Commit {
    pub fn new(agent: Arc<dyn ForwarderAgent>) -> Self {
        Self {
            agent,
            applied: DashMap::new(),
        }
    }
}

#[async_trait]
impl NetworkServiceStage for Commit {
    fn name(&self) -> &str {
        "commit"
    }

    async fn request(
        &self,
        ctx: &mut ChainContext,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let conn = next.request(ctx, request).await?;
        if !ctx.dataplane_config.is_empty() {
            self.agent.update(&ctx.dataplane_config).await?;
            if let Ok(snapshot) = serde_json::to_string(&ctx.dataplane_config) {
                tracing::debug!(connection_id = %conn.id, config = %snapshot, "configuration applied");
            }
            self.applied
                .insert(conn.id.clone(), ctx.dataplane_config.clone());
        }
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut ChainContext,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        let id = connection.id.clone();
        let result = next.close(ctx, connection).await;
        // The dataplane is unprogrammed even when the downstream close
        // failed; the caller still sees the downstream error.
        if let Some((_, config)) = self.applied.remove(&id) {
            if let Err(err) = self.agent.delete(&config).await {
                if result.is_ok() {
                    return Err(err);
                }
                tracing::warn!(connection_id = %id, error = %err, "agent delete failed during close");
            }
        }
        result
    }
}

/// Agent that only logs what it would program. Stands in until a live
/// forwarder endpoint is configured.
pub struct LoggingAgent;

#[async_trait]
impl ForwarderAgent for LoggingAgent {
    async fn update(&self, config: &DataplaneConfig) -> Result<(), ChainError> {
        match serde_json::to_string(config) {
            Ok(snapshot) => tracing::info!(config = %snapshot, "agent update"),
            Err(err) => tracing::warn!(error = %err, "agent update (unserializable config)"),
        }
        Ok(())
    }

    async fn delete(&self, config: &DataplaneConfig) -> Result<(), ChainError> {
        match serde_json::to_string(config) {
            Ok(snapshot) => tracing::info!(config = %snapshot, "agent delete"),
            Err(err) => tracing::warn!(error = %err, "agent delete (unserializable config)"),
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), ChainError> {
        tracing::info!("agent reset");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Captures agent calls for assertions, in place of a live forwarder.
    #[derive(Default)]
    pub(crate) struct MockAgent {
        pub(crate) commands: Mutex<Vec<String>>,
    }

    impl MockAgent {
        pub(crate) fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ForwarderAgent for MockAgent {
        async fn update(&self, config: &DataplaneConfig) -> Result<(), ChainError> {
            self.commands.lock().unwrap().push(format!(
                "update: {} linux, {} vpp, {} routes",
                config.linux_interfaces.len(),
                config.vpp_interfaces.len(),
                config.linux_routes.len()
            ));
            Ok(())
        }

        async fn delete(&self, config: &DataplaneConfig) -> Result<(), ChainError> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("delete: {} vpp", config.vpp_interfaces.len()));
            Ok(())
        }

        async fn reset(&self) -> Result<(), ChainError> {
            self.commands.lock().unwrap().push("reset".to_string());
            Ok(())
        }
    }
}
