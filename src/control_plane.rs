//! Composition root for the library.
//!
//! [`ControlPlane`] builds every component once from configuration and hands
//! them their collaborators through constructors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::config::ControlPlaneConfig;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{ApiRequest, RuntimeService};
use crate::gateway::AdapterRegistry;
use crate::ingress::IngressRegistry;
use crate::provision::{
    ConsumerProvisioner, NewConsumer, PolicyReconciler, RouteProvisioner, ZoneConfig, ZoneIngressManager,
};
use crate::store::Store;

/// Declarative batch applied at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub runtime_services: Vec<RuntimeService>,
    pub consumers: Vec<NewConsumer>,
    pub zones: Vec<ZoneConfig>,
    pub routes: Vec<ApiRequest>,
}

impl Manifest {
    pub async fn load<P: AsRef<Path>>(path: P) -> ControlPlaneResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Outcome of one manifest entry
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub kind: &'static str,
    pub name: String,
    pub result: Result<String, ControlPlaneError>,
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    store: Arc<dyn Store>,
    registry: Arc<AdapterRegistry>,
    routes: RouteProvisioner,
    consumers: Arc<ConsumerProvisioner>,
    zones: ZoneIngressManager,
}

impl ControlPlane {
    pub fn new(config: ControlPlaneConfig, store: Arc<dyn Store>, ingress: Arc<IngressRegistry>) -> Self {
        let registry = Arc::new(AdapterRegistry::new(&config));
        let reconciler = Arc::new(PolicyReconciler::new(store.clone(), config.routing.clone()));
        let consumers = Arc::new(ConsumerProvisioner::new(registry.clone(), store.clone()));
        let routes = RouteProvisioner::new(
            registry.clone(),
            store.clone(),
            reconciler,
            consumers.clone(),
            config.routing.clone(),
        );
        let zones = ZoneIngressManager::new(registry.clone(), ingress, store.clone(), config.routing.clone());

        Self {
            config,
            store,
            registry,
            routes,
            consumers,
            zones,
        }
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteProvisioner {
        &self.routes
    }

    pub fn consumers(&self) -> &ConsumerProvisioner {
        &self.consumers
    }

    pub fn zones(&self) -> &ZoneIngressManager {
        &self.zones
    }

    /// Load the configured policy catalog into the store
    pub async fn seed_policies(&self) -> ControlPlaneResult<usize> {
        for policy in &self.config.policies {
            self.store.upsert_policy(policy).await?;
        }
        info!(policies = self.config.policies.len(), "policy catalog seeded");
        Ok(self.config.policies.len())
    }

    /// Apply a manifest entry by entry. A failing entry is recorded and the
    /// rest still run.
    pub async fn apply_manifest(&self, manifest: Manifest) -> Vec<ManifestEntry> {
        let mut report = Vec::new();

        for service in manifest.runtime_services {
            let result = self
                .store
                .insert_runtime_service(&service)
                .await
                .map(|_| service.id.clone());
            report.push(entry("runtime_service", service.id.clone(), result));
        }
        for consumer in manifest.consumers {
            let name = consumer.name.clone();
            let result = self.consumers.create(consumer).await.map(|c| c.id);
            report.push(entry("consumer", name, result));
        }
        for zone in manifest.zones {
            let name = zone.name.clone();
            let result = self.zones.create(zone).await.map(|z| z.id);
            report.push(entry("zone", name, result));
        }
        for route in manifest.routes {
            let name = format!("{} {}", route.method.as_deref().unwrap_or("*"), route.path);
            let result = self.routes.create(route).await.map(|r| r.id);
            report.push(entry("route", name, result));
        }
        report
    }
}

fn entry(kind: &'static str, name: String, result: ControlPlaneResult<String>) -> ManifestEntry {
    match &result {
        Ok(id) => info!(kind, name = %name, id = %id, "manifest entry applied"),
        Err(e) => error!(kind, name = %name, error = %e, code = e.error_type(), "manifest entry failed"),
    }
    ManifestEntry { kind, name, result }
}
