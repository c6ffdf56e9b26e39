//! # Zone and Ingress Lifecycle
//!
//! A zone is the routing unit a group of routes shares. On Kubernetes-backed
//! clusters a zone may own an Ingress of the same name that forwards either to
//! the gateway's service or straight to a runtime service.
//!
//! Every change to a zone's ordering blob triggers a domain-policy recompute
//! for the whole cluster. Recomputes are unlocked: two concurrent ones for the
//! same cluster race and the last write wins.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::{ClusterConfig, RoutingConfig};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{Package, RuntimeService, Zone, ZoneKongPolicies, ZoneType};
use crate::gateway::dto::PluginRequest;
use crate::gateway::{AdapterCapabilities, AdapterRegistry, IngressBackend};
use crate::ingress::{BackendProtocol, IngressBackendRef, IngressClient, IngressRegistry, IngressRoute, RouteOptions};
use crate::store::Store;

pub const DOMAIN_POLICY_PLUGIN: &str = "domain-policy";

/// Hosts and path an Ingress should route for a zone
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneRoute {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub options: RouteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub cluster_name: String,
    pub project_id: String,
    pub env: String,
    pub zone_type: ZoneType,
    #[serde(default)]
    pub route: Option<ZoneRoute>,
    /// Runtime deployment the Ingress forwards to on runtime-service backends
    #[serde(default)]
    pub runtime_service_id: Option<String>,
}

/// Name of a zone and of its Ingress
pub fn zone_name(env: &str, project_id: &str, name: &str, id: &str) -> String {
    let suffix = if id.len() >= 6 {
        format!("{}{}", &id[..3], &id[id.len() - 3..])
    } else {
        id.to_string()
    };
    format!("dice-{}-{}-{}-{}", env, project_id, name, suffix).replace('_', "-")
}

/// Precedence of domain-policy entries: higher priority first, then longer
/// regex, then lexicographic regex
pub fn domain_policy_order(a: &ZoneKongPolicies, b: &ZoneKongPolicies) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.regex.len().cmp(&a.regex.len()))
        .then_with(|| a.regex.cmp(&b.regex))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct ZoneIngressManager {
    registry: Arc<AdapterRegistry>,
    ingress: Arc<IngressRegistry>,
    store: Arc<dyn Store>,
    routing: RoutingConfig,
}

impl ZoneIngressManager {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        ingress: Arc<IngressRegistry>,
        store: Arc<dyn Store>,
        routing: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            ingress,
            store,
            routing,
        }
    }

    pub async fn get(&self, zone_id: &str) -> ControlPlaneResult<Zone> {
        self.store
            .get_zone(zone_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("zone", zone_id))
    }

    /// Persist a zone row without touching the cluster
    pub async fn create_without_ingress(&self, config: &ZoneConfig) -> ControlPlaneResult<Zone> {
        let id = Uuid::new_v4().simple().to_string();
        let zone = Zone {
            name: zone_name(&config.env, &config.project_id, &config.name, &id),
            id,
            cluster_name: config.cluster_name.clone(),
            project_id: config.project_id.clone(),
            env: config.env.clone(),
            zone_type: config.zone_type,
            has_ingress: false,
            ingress_namespace: None,
            kong_policies: None,
            created_at: Utc::now(),
        };
        self.store.insert_zone(&zone).await?;
        debug!(zone_id = %zone.id, name = %zone.name, "zone row created");
        Ok(zone)
    }

    /// Create a zone and, where the cluster routes through Ingress, its Ingress.
    ///
    /// If the Ingress cannot be written its remnants are deleted and the error
    /// returned; the zone row is kept. A cluster without an ingress client
    /// gets the zone without an Ingress.
    #[instrument(skip_all, fields(cluster = %config.cluster_name, zone = %config.name))]
    pub async fn create(&self, config: ZoneConfig) -> ControlPlaneResult<Zone> {
        let mut zone = self.create_without_ingress(&config).await?;

        let cluster = self.registry.cluster(&config.cluster_name)?.clone();
        let Some(route) = config.route.clone() else {
            return Ok(zone);
        };
        if !cluster.ingress_capable() || self.routing.use_admin_endpoint {
            debug!("cluster does not route through ingress");
            return Ok(zone);
        }
        let caps = self.registry.adapter_for(&config.cluster_name)?.capabilities();
        if matches!(zone.zone_type, ZoneType::Package | ZoneType::Unity) && !caps.ingress_for_package_zones {
            debug!("package zones on this gateway are served without an ingress");
            return Ok(zone);
        }

        let runtime = self.runtime_service(config.runtime_service_id.as_deref()).await?;
        let client = match self.ingress.client_for(&config.cluster_name) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "no ingress client for cluster, zone created without ingress");
                return Ok(zone);
            }
        };
        let mut options = route.options.clone();
        let (namespace, backend) = self
            .resolve_backend(client.as_ref(), &cluster, caps, &zone, runtime.as_ref(), &mut options)
            .await?;

        let routes = ingress_routes(&route);
        if let Err(e) = client
            .create_or_update_ingress(&namespace, &zone.name, &routes, &backend, &cluster.gateway_provider, &options)
            .await
        {
            if let Err(clear) = client.delete_ingress(&namespace, &zone.name).await {
                error!(error = %clear, "failed to clear zone ingress");
            }
            return Err(e);
        }

        zone.has_ingress = true;
        zone.ingress_namespace = Some(namespace);
        self.store.update_zone(&zone).await?;
        info!(zone_id = %zone.id, name = %zone.name, "zone ingress created");
        Ok(zone)
    }

    /// Re-point the zone's Ingress; returns whether it already existed
    #[instrument(skip_all, fields(zone_id = %zone_id))]
    pub async fn update_route(
        &self,
        zone_id: &str,
        route: ZoneRoute,
        runtime_service_id: Option<&str>,
    ) -> ControlPlaneResult<bool> {
        let mut zone = self.get(zone_id).await?;
        let cluster = self.registry.cluster(&zone.cluster_name)?.clone();
        if !cluster.ingress_capable() || self.routing.use_admin_endpoint {
            return Err(ControlPlaneError::invalid_request(
                "cluster",
                format!("cluster {} does not support ingress route config", zone.cluster_name),
            ));
        }
        let caps = self.registry.adapter_for(&zone.cluster_name)?.capabilities();
        let runtime = self.runtime_service(runtime_service_id).await?;
        let client = self.ingress.client_for(&zone.cluster_name)?;

        let mut options = route.options.clone();
        let (namespace, backend) = self
            .resolve_backend(client.as_ref(), &cluster, caps, &zone, runtime.as_ref(), &mut options)
            .await?;
        let existed = client
            .create_or_update_ingress(
                &namespace,
                &zone.name,
                &ingress_routes(&route),
                &backend,
                &cluster.gateway_provider,
                &options,
            )
            .await?;

        if !zone.has_ingress || zone.ingress_namespace.as_deref() != Some(namespace.as_str()) {
            zone.has_ingress = true;
            zone.ingress_namespace = Some(namespace);
            self.store.update_zone(&zone).await?;
        }
        info!(existed, "zone ingress updated");
        Ok(existed)
    }

    /// Remove the zone's Ingress, keeping the row
    pub async fn delete_route(&self, zone_id: &str) -> ControlPlaneResult<()> {
        let mut zone = self.get(zone_id).await?;
        if !zone.has_ingress {
            return Ok(());
        }
        self.clear_ingress(&zone).await?;
        zone.has_ingress = false;
        self.store.update_zone(&zone).await
    }

    /// Delete the zone, its Ingress if it has one, then recompute the domain policy
    #[instrument(skip_all, fields(zone_id = %zone_id))]
    pub async fn delete(&self, zone_id: &str) -> ControlPlaneResult<()> {
        let Some(zone) = self.store.get_zone(zone_id).await? else {
            return Ok(());
        };
        if zone.has_ingress {
            self.clear_ingress(&zone).await?;
        }
        self.store.delete_zone(zone_id).await?;
        self.recompute_domain_policy(&zone.cluster_name).await?;
        info!("zone deleted");
        Ok(())
    }

    /// Store the zone's ordering blob and recompute the cluster's domain policy
    pub async fn set_zone_policies(&self, zone_id: &str, policies: Option<ZoneKongPolicies>) -> ControlPlaneResult<()> {
        let mut zone = self.get(zone_id).await?;
        zone.kong_policies = match policies {
            Some(p) => Some(serde_json::to_string(&p)?),
            None => None,
        };
        self.store.update_zone(&zone).await?;
        self.recompute_domain_policy(&zone.cluster_name).await
    }

    /// Collect the ordering blobs of every zone in the cluster and push them
    /// as one `domain-policy` plugin
    pub async fn recompute_domain_policy(&self, cluster_name: &str) -> ControlPlaneResult<()> {
        let adapter = self.registry.adapter_for(cluster_name)?;
        if !adapter.capabilities().domain_policy {
            debug!(cluster = cluster_name, "gateway has no domain policy");
            return Ok(());
        }

        let mut entries = Vec::new();
        for zone in self.store.list_zones_by_cluster(cluster_name).await? {
            let Some(blob) = zone.kong_policies.as_deref().filter(|b| !b.is_empty()) else {
                continue;
            };
            let mut entry: ZoneKongPolicies = serde_json::from_str(blob)?;
            if entry.package_name.is_empty() {
                if let Some(package) = self.zone_package(&zone).await? {
                    entry.package_name = package.name;
                }
            }
            entry.project_id = zone.project_id.clone();
            entry.env = zone.env.to_lowercase();
            entries.push(entry);
        }
        entries.sort_by(domain_policy_order);

        let config = json!({
            "regexs": column(&entries, |e| e.regex.as_str()),
            "ids": column(&entries, |e| e.id.as_str()),
            "enables": column(&entries, |e| e.enables.as_str()),
            "disables": column(&entries, |e| e.disables.as_str()),
            "allows": vec!["1"; entries.len()],
            "packs": column(&entries, |e| e.package_name.as_str()),
            "dpids": column(&entries, |e| e.project_id.as_str()),
            "denvs": column(&entries, |e| e.env.as_str()),
        });
        adapter
            .create_or_update_plugin(&PluginRequest::new(DOMAIN_POLICY_PLUGIN, config))
            .await?;
        info!(cluster = cluster_name, entries = entries.len(), "domain policy pushed");
        Ok(())
    }

    /// Package a zone serves: its own for package zones, the package of its
    /// API for package-api zones
    async fn zone_package(&self, zone: &Zone) -> ControlPlaneResult<Option<Package>> {
        match zone.zone_type {
            ZoneType::Package | ZoneType::Unity => self.store.find_package_by_zone(&zone.id).await,
            ZoneType::PackageApi => {
                for route in self.store.list_routes_by_zone(&zone.id).await? {
                    for package_id in self.store.packages_for_route(&route.id).await? {
                        if let Some(package) = self.store.get_package(&package_id).await? {
                            return Ok(Some(package));
                        }
                    }
                }
                Ok(None)
            }
            ZoneType::Runtime => Ok(None),
        }
    }

    async fn clear_ingress(&self, zone: &Zone) -> ControlPlaneResult<()> {
        let client = self.ingress.client_for(&zone.cluster_name)?;
        let namespace = match &zone.ingress_namespace {
            Some(ns) => ns.clone(),
            None => {
                let cluster = self.registry.cluster(&zone.cluster_name)?;
                let caps = self.registry.adapter_for(&zone.cluster_name)?.capabilities();
                match caps.ingress_backend {
                    IngressBackend::GatewayService => cluster.gateway_namespace.clone(),
                    IngressBackend::RuntimeService => fallback_namespace(zone),
                }
            }
        };
        client.delete_ingress(&namespace, &zone.name).await
    }

    async fn runtime_service(&self, id: Option<&str>) -> ControlPlaneResult<Option<RuntimeService>> {
        match id {
            Some(id) => Ok(Some(
                self.store
                    .get_runtime_service(id)
                    .await?
                    .ok_or_else(|| ControlPlaneError::not_found("runtime service", id))?,
            )),
            None => Ok(None),
        }
    }

    /// Namespace and service the zone's Ingress forwards to
    async fn resolve_backend(
        &self,
        client: &dyn IngressClient,
        cluster: &ClusterConfig,
        caps: AdapterCapabilities,
        zone: &Zone,
        runtime: Option<&RuntimeService>,
        options: &mut RouteOptions,
    ) -> ControlPlaneResult<(String, IngressBackendRef)> {
        options.enable_tls = true;
        match caps.ingress_backend {
            IngressBackend::GatewayService => {
                let namespace = cluster.gateway_namespace.clone();
                let service = cluster.gateway_service.clone();
                let mut port = self.routing.admin_http_port;
                if options.backend_protocol == Some(BackendProtocol::Https) {
                    if client.gateway_supports_https(&namespace, &service).await? {
                        port = self.routing.admin_https_port;
                    } else {
                        warn!("gateway service has no https port, falling back to http");
                        options.backend_protocol = None;
                    }
                }
                Ok((
                    namespace,
                    IngressBackendRef {
                        service_name: service,
                        service_port: port,
                    },
                ))
            }
            IngressBackend::RuntimeService => {
                let (namespace, service) = match runtime {
                    Some(rt) if !rt.project_namespace.is_empty() => (rt.project_namespace.clone(), rt.backend_service_name()),
                    _ => (fallback_namespace(zone), zone.name.to_lowercase()),
                };
                let port = match client.service_port(&namespace, &service).await? {
                    Some(port) => port,
                    None => {
                        warn!(namespace = %namespace, service = %service, "service not found, using default port");
                        self.routing.default_service_port
                    }
                };
                Ok((
                    namespace,
                    IngressBackendRef {
                        service_name: service,
                        service_port: port,
                    },
                ))
            }
        }
    }
}

fn fallback_namespace(zone: &Zone) -> String {
    format!("project-{}-{}", zone.project_id, zone.env.to_lowercase())
}

fn column(entries: &[ZoneKongPolicies], field: impl Fn(&ZoneKongPolicies) -> &str) -> Vec<String> {
    entries.iter().map(|e| field(e).to_string()).collect()
}

fn ingress_routes(route: &ZoneRoute) -> Vec<IngressRoute> {
    route
        .hosts
        .iter()
        .map(|host| IngressRoute {
            domain: host.clone(),
            path: route.path.clone(),
        })
        .collect()
}
