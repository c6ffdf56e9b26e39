//! # Managed Cloud Adapter
//!
//! Fronts a cloud-managed gateway whose control plane reconciles
//! asynchronously. Requests are accepted optimistically:
//!
//! - ids for consumers, services, routes and upstream objects are generated
//!   locally as UUIDs
//! - the reported version is fixed
//! - plugin configuration is global per plugin name, so every route-level
//!   plugin call lands on the same per-name entry
//! - credentials are folded into the owning auth plugin's `consumers` list
//! - deletes of consumers, services, routes and plugins are accepted no-ops

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::gateway::dto::*;
use crate::gateway::{AdapterCapabilities, GatewayAdapter, IngressBackend};

/// Version the managed family always reports
pub const MANAGED_CLOUD_VERSION: &str = "2.0.0";

const CONSUMERS_KEY: &str = "consumers";
const CREDENTIAL_ID_KEY: &str = "credential_id";

/// Adapter for the managed cloud gateway family
pub struct ManagedCloudAdapter {
    cluster_name: String,
    /// Global plugin configuration keyed by plugin name
    plugins: DashMap<String, PluginResponse>,
}

impl ManagedCloudAdapter {
    pub fn new<S: Into<String>>(cluster_name: S) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            plugins: DashMap::new(),
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn upsert_plugin(&self, req: &PluginRequest) -> PluginResponse {
        let mut entry = self
            .plugins
            .entry(req.name.clone())
            .or_insert_with(|| PluginResponse {
                id: req.id.clone().unwrap_or_else(Self::new_id),
                name: req.name.clone(),
                route: None,
                service: None,
                consumer: None,
                config: Value::Null,
                enabled: true,
            });
        let consumers = entry.config.get(CONSUMERS_KEY).cloned();
        let mut config = req.config.clone();
        if let (Some(existing), Some(obj)) = (consumers, config.as_object_mut()) {
            obj.entry(CONSUMERS_KEY.to_string()).or_insert(existing);
        }
        entry.config = config;
        entry.enabled = req.enabled.unwrap_or(true);

        let mut response = entry.clone();
        response.route = req.route.clone();
        response.service = req.service.clone();
        response.consumer = req.consumer.clone();
        response
    }

    /// Current global configuration of a plugin
    pub fn plugin_config(&self, plugin_name: &str) -> Option<Value> {
        self.plugins.get(plugin_name).map(|p| p.config.clone())
    }
}

#[async_trait]
impl GatewayAdapter for ManagedCloudAdapter {
    fn provider(&self) -> &'static str {
        "managed-cloud"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            host_check: false,
            domain_policy: false,
            remote_credentials: false,
            ingress_backend: IngressBackend::RuntimeService,
            ingress_for_package_zones: false,
        }
    }

    fn gateway_provider_exist(&self) -> bool {
        !self.cluster_name.is_empty()
    }

    async fn get_version(&self) -> ControlPlaneResult<String> {
        Ok(MANAGED_CLOUD_VERSION.to_string())
    }

    async fn check_plugin_enabled(&self, plugin_name: &str) -> ControlPlaneResult<bool> {
        if plugin_name.is_empty() {
            return Err(ControlPlaneError::invalid_request("plugin_name", "empty"));
        }
        Ok(true)
    }

    async fn create_consumer(&self, req: &ConsumerRequest) -> ControlPlaneResult<ConsumerResponse> {
        Ok(ConsumerResponse {
            id: req.id.clone().unwrap_or_else(Self::new_id),
            username: req.username.clone(),
            custom_id: req.custom_id.clone(),
        })
    }

    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()> {
        debug!(consumer_id = id, cluster = %self.cluster_name, "consumer delete accepted");
        Ok(())
    }

    async fn create_or_update_service(&self, req: &ServiceRequest) -> ControlPlaneResult<ServiceResponse> {
        Ok(ServiceResponse {
            id: req.id.clone().unwrap_or_else(Self::new_id),
            protocol: req.protocol.clone(),
            host: req.host.clone(),
            port: if req.port > 0 { req.port } else { 80 },
            path: req.path.clone(),
        })
    }

    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()> {
        debug!(service_id = id, "service delete accepted");
        Ok(())
    }

    async fn create_or_update_route(&self, req: &RouteRequest) -> ControlPlaneResult<RouteResponse> {
        Ok(RouteResponse {
            id: req.id.clone().unwrap_or_else(Self::new_id),
            protocols: req.protocols.clone(),
            methods: req.methods.clone(),
            hosts: Some(req.hosts.clone()),
            paths: Some(req.paths.clone()),
            service: Some(req.service.clone()),
            tags: Some(req.tags.clone()),
        })
    }

    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()> {
        debug!(route_id = id, "route delete accepted");
        Ok(())
    }

    async fn touch_route_oauth_method(&self, _route_id: &str) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn get_routes_with_tag(&self, _tag: &str) -> ControlPlaneResult<Vec<RouteResponse>> {
        Ok(Vec::new())
    }

    async fn create_or_update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        Ok(Some(self.upsert_plugin(req)))
    }

    async fn add_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        Ok(Some(self.upsert_plugin(req)))
    }

    async fn update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        Ok(Some(self.upsert_plugin(req)))
    }

    async fn remove_plugin(&self, id: &str) -> ControlPlaneResult<()> {
        debug!(plugin_id = id, "plugin config is global, remove accepted");
        Ok(())
    }

    async fn get_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        Ok(self.plugins.get(&req.name).map(|p| p.clone()))
    }

    async fn delete_plugin_if_exist(&self, req: &PluginRequest) -> ControlPlaneResult<()> {
        debug!(plugin = %req.name, "plugin config is global, delete accepted");
        Ok(())
    }

    async fn create_credential(&self, req: &CredentialRequest) -> ControlPlaneResult<CredentialResponse> {
        let id = Self::new_id();
        let mut entry_config = req.config.clone();
        if let Some(obj) = entry_config.as_object_mut() {
            obj.insert(CREDENTIAL_ID_KEY.to_string(), json!(id));
            obj.insert("name".to_string(), json!(req.consumer_id));
        }

        let mut plugin = self
            .plugins
            .entry(req.plugin_name.clone())
            .or_insert_with(|| PluginResponse {
                id: Self::new_id(),
                name: req.plugin_name.clone(),
                route: None,
                service: None,
                consumer: None,
                config: json!({}),
                enabled: true,
            });
        if !plugin.config.is_object() {
            plugin.config = json!({});
        }
        if let Some(obj) = plugin.config.as_object_mut() {
            let consumers = obj
                .entry(CONSUMERS_KEY.to_string())
                .or_insert_with(|| json!([]));
            if let Some(list) = consumers.as_array_mut() {
                list.push(entry_config.clone());
            }
        }

        Ok(CredentialResponse {
            id,
            consumer_id: req.consumer_id.clone(),
            plugin_name: req.plugin_name.clone(),
            config: entry_config,
        })
    }

    async fn delete_credential(
        &self,
        consumer_id: &str,
        plugin_name: &str,
        credential_id: &str,
    ) -> ControlPlaneResult<()> {
        if let Some(mut plugin) = self.plugins.get_mut(plugin_name) {
            if let Some(list) = plugin
                .config
                .get_mut(CONSUMERS_KEY)
                .and_then(Value::as_array_mut)
            {
                list.retain(|entry| entry.get(CREDENTIAL_ID_KEY).and_then(Value::as_str) != Some(credential_id));
            }
        }
        debug!(consumer_id, plugin = plugin_name, credential_id, "credential folded out of plugin config");
        Ok(())
    }

    async fn get_credential_list(
        &self,
        _consumer_id: &str,
        _plugin_name: &str,
    ) -> ControlPlaneResult<Vec<CredentialResponse>> {
        Ok(Vec::new())
    }

    async fn create_acl_group(&self, _consumer_id: &str, _group: &str) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn create_upstream(&self, req: &UpstreamRequest) -> ControlPlaneResult<UpstreamResponse> {
        Ok(UpstreamResponse {
            id: Self::new_id(),
            name: req.name.clone(),
        })
    }

    async fn add_upstream_target(
        &self,
        upstream_id: &str,
        req: &UpstreamTargetRequest,
    ) -> ControlPlaneResult<UpstreamTargetResponse> {
        if upstream_id.is_empty() {
            return Err(ControlPlaneError::invalid_request("upstream_id", "empty"));
        }
        Ok(UpstreamTargetResponse {
            id: Self::new_id(),
            target: req.target.clone(),
            weight: req.weight,
        })
    }

    async fn get_upstream_status(&self, _upstream_id: &str) -> ControlPlaneResult<UpstreamStatus> {
        Ok(UpstreamStatus::default())
    }

    async fn delete_upstream_target(&self, _upstream_id: &str, _target_id: &str) -> ControlPlaneResult<()> {
        Ok(())
    }
}
