//! Per-cluster adapter selection.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::config::{AdminClientConfig, ClusterConfig, ControlPlaneConfig};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::gateway::{AdminApiAdapter, GatewayAdapter, ManagedCloudAdapter, MANAGED_CLOUD_PROVIDER};

/// Resolves and caches one adapter per cluster.
///
/// The provider value from cluster metadata is the single selection point:
/// empty selects the admin API family, `MSE` the managed cloud family, and
/// anything else is rejected.
pub struct AdapterRegistry {
    clusters: std::collections::HashMap<String, ClusterConfig>,
    admin_client: AdminClientConfig,
    adapters: DashMap<String, Arc<dyn GatewayAdapter>>,
}

impl AdapterRegistry {
    pub fn new(config: &ControlPlaneConfig) -> Self {
        Self {
            clusters: config.clusters.clone(),
            admin_client: config.admin_client.clone(),
            adapters: DashMap::new(),
        }
    }

    /// Pre-register an adapter for a cluster, bypassing provider resolution
    pub fn register(&self, cluster_name: &str, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(cluster_name.to_string(), adapter);
    }

    pub fn cluster(&self, cluster_name: &str) -> ControlPlaneResult<&ClusterConfig> {
        self.clusters
            .get(cluster_name)
            .ok_or_else(|| ControlPlaneError::config(format!("cluster '{}' is not configured", cluster_name)))
    }

    /// Adapter for `cluster_name`, built on first use
    pub fn adapter_for(&self, cluster_name: &str) -> ControlPlaneResult<Arc<dyn GatewayAdapter>> {
        if let Some(adapter) = self.adapters.get(cluster_name) {
            return Ok(adapter.clone());
        }

        let cluster = self.cluster(cluster_name)?;
        let adapter: Arc<dyn GatewayAdapter> = match cluster.gateway_provider.as_str() {
            "" => {
                let addr = cluster.admin_addr.as_deref().ok_or_else(|| {
                    ControlPlaneError::config(format!("cluster '{}' has no admin_addr", cluster_name))
                })?;
                Arc::new(AdminApiAdapter::new(addr, &self.admin_client)?)
            }
            MANAGED_CLOUD_PROVIDER => Arc::new(ManagedCloudAdapter::new(cluster_name)),
            other => {
                return Err(ControlPlaneError::UnknownGatewayProvider {
                    provider: other.to_string(),
                    cluster: cluster_name.to_string(),
                })
            }
        };

        info!(cluster = cluster_name, provider = adapter.provider(), "gateway adapter resolved");
        let adapter = self
            .adapters
            .entry(cluster_name.to_string())
            .or_insert(adapter)
            .clone();
        Ok(adapter)
    }
}
