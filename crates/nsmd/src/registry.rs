//! In-memory endpoint registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use nsm_chain::{ChainError, DiscoveredEndpoint};
use nsm_connect::DiscoveryClient;

/// One registered endpoint, as it appears in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub name: String,
    pub network_service: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub manager_url: String,
}

/// Discovery backed by a fixed endpoint list, loaded at startup.
#[derive(Default)]
pub struct StaticRegistry {
    endpoints: Vec<DiscoveredEndpoint>,
}

impl StaticRegistry {
    pub fn new(records: Vec<EndpointRecord>) -> Self {
        let endpoints = records
            .into_iter()
            .map(|r| DiscoveredEndpoint {
                name: r.name,
                network_service: r.network_service,
                labels: r.labels,
                manager_url: r.manager_url,
            })
            .collect();
        Self { endpoints }
    }

    /// Parses a registry from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<EndpointRecord> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[async_trait]
impl DiscoveryClient for StaticRegistry {
    async fn find_endpoints(
        &self,
        network_service: &str,
    ) -> Result<Vec<DiscoveredEndpoint>, ChainError> {
        Ok(self
            .endpoints
            .iter()
            .filter(|e| e.network_service == network_service)
            .cloned()
            .collect())
    }
}
