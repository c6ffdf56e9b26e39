//! Shared fixtures for the integration tests.
//!
//! [`FakeAdapter`] and [`FakeIngress`] record every call they receive and can
//! be told to fail a named operation.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gateway_control_plane::core::config::{ClusterConfig, ClusterPlatform, ControlPlaneConfig};
use gateway_control_plane::core::types::{ApiRequest, Policy, PolicyCategory, RouteScope, RouteTarget};
use gateway_control_plane::gateway::dto::*;
use gateway_control_plane::gateway::{AdapterCapabilities, GatewayAdapter, IngressBackend};
use gateway_control_plane::ingress::{IngressBackendRef, IngressClient, IngressRegistry, IngressRoute, RouteOptions};
use gateway_control_plane::{ControlPlane, ControlPlaneError, ControlPlaneResult, MemoryStore};
use serde_json::json;

pub const CLUSTER: &str = "test-cluster";

pub fn injected(operation: &str) -> ControlPlaneError {
    ControlPlaneError::Backend {
        operation: operation.to_string(),
        status: 500,
        body: "injected failure".to_string(),
    }
}

/// Gateway adapter that keeps everything in memory
pub struct FakeAdapter {
    pub caps: AdapterCapabilities,
    pub version: Mutex<String>,
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Mutex<HashSet<String>>,
    pub disabled_plugins: Mutex<HashSet<String>>,
    /// Requests passed to `create_or_update_plugin`
    pub upserted_plugins: Mutex<Vec<PluginRequest>>,
    next_id: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::with_capabilities(AdapterCapabilities {
            host_check: true,
            domain_policy: true,
            remote_credentials: false,
            ingress_backend: IngressBackend::GatewayService,
            ingress_for_package_zones: true,
        })
    }

    pub fn managed() -> Self {
        Self::with_capabilities(AdapterCapabilities {
            host_check: false,
            domain_policy: false,
            remote_credentials: false,
            ingress_backend: IngressBackend::RuntimeService,
            ingress_for_package_zones: false,
        })
    }

    pub fn with_capabilities(caps: AdapterCapabilities) -> Self {
        Self {
            caps,
            version: Mutex::new("2.8.1".to_string()),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(HashSet::new()),
            disabled_plugins: Mutex::new(HashSet::new()),
            upserted_plugins: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Fail every call to `operation`, or only the one for a given detail
    /// when written as `operation:detail`
    pub fn fail(&self, operation: &str) {
        self.fail_on.lock().unwrap().insert(operation.to_string());
    }

    pub fn disable_plugin(&self, name: &str) {
        self.disabled_plugins.lock().unwrap().insert(name.to_string());
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, operation: &str, detail: &str) -> ControlPlaneResult<()> {
        self.calls.lock().unwrap().push(format!("{} {}", operation, detail));
        let fail_on = self.fail_on.lock().unwrap();
        if fail_on.contains(operation) || fail_on.contains(&format!("{}:{}", operation, detail)) {
            return Err(injected(operation));
        }
        Ok(())
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn plugin_enabled(&self, name: &str) -> bool {
        !self.disabled_plugins.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl GatewayAdapter for FakeAdapter {
    fn provider(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.caps
    }

    fn gateway_provider_exist(&self) -> bool {
        true
    }

    async fn get_version(&self) -> ControlPlaneResult<String> {
        self.record("get_version", "")?;
        Ok(self.version.lock().unwrap().clone())
    }

    async fn check_plugin_enabled(&self, plugin_name: &str) -> ControlPlaneResult<bool> {
        self.record("check_plugin_enabled", plugin_name)?;
        Ok(self.plugin_enabled(plugin_name))
    }

    async fn create_consumer(&self, req: &ConsumerRequest) -> ControlPlaneResult<ConsumerResponse> {
        self.record("create_consumer", &req.username)?;
        Ok(ConsumerResponse {
            id: self.id("consumer"),
            username: req.username.clone(),
            custom_id: req.custom_id.clone(),
        })
    }

    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()> {
        self.record("delete_consumer", id)
    }

    async fn create_or_update_service(&self, req: &ServiceRequest) -> ControlPlaneResult<ServiceResponse> {
        self.record("create_or_update_service", &format!("{}:{}", req.host, req.port))?;
        Ok(ServiceResponse {
            id: req.id.clone().unwrap_or_else(|| self.id("svc")),
            protocol: req.protocol.clone(),
            host: req.host.clone(),
            port: req.port,
            path: req.path.clone(),
        })
    }

    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()> {
        self.record("delete_service", id)
    }

    async fn create_or_update_route(&self, req: &RouteRequest) -> ControlPlaneResult<RouteResponse> {
        self.record("create_or_update_route", &req.paths.join(","))?;
        Ok(RouteResponse {
            id: req.id.clone().unwrap_or_else(|| self.id("route")),
            protocols: req.protocols.clone(),
            methods: req.methods.clone(),
            hosts: Some(req.hosts.clone()),
            paths: Some(req.paths.clone()),
            service: Some(req.service.clone()),
            tags: Some(req.tags.clone()),
        })
    }

    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()> {
        self.record("delete_route", id)
    }

    async fn touch_route_oauth_method(&self, route_id: &str) -> ControlPlaneResult<()> {
        self.record("touch_route_oauth_method", route_id)
    }

    async fn get_routes_with_tag(&self, tag: &str) -> ControlPlaneResult<Vec<RouteResponse>> {
        self.record("get_routes_with_tag", tag)?;
        Ok(Vec::new())
    }

    async fn create_or_update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        self.record("create_or_update_plugin", &req.name)?;
        self.upserted_plugins.lock().unwrap().push(req.clone());
        if !self.plugin_enabled(&req.name) {
            return Ok(None);
        }
        Ok(Some(plugin_response(req, req.id.clone().unwrap_or_else(|| self.id("plugin")))))
    }

    async fn add_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        self.record("add_plugin", &req.name)?;
        if !self.plugin_enabled(&req.name) {
            return Ok(None);
        }
        Ok(Some(plugin_response(req, self.id("plugin"))))
    }

    async fn update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        self.record("update_plugin", &req.name)?;
        if !self.plugin_enabled(&req.name) {
            return Ok(None);
        }
        let id = req
            .id
            .clone()
            .ok_or_else(|| ControlPlaneError::invalid_request("plugin_id", "required for update"))?;
        Ok(Some(plugin_response(req, id)))
    }

    async fn remove_plugin(&self, id: &str) -> ControlPlaneResult<()> {
        self.record("remove_plugin", id)
    }

    async fn get_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        self.record("get_plugin", &req.name)?;
        Ok(None)
    }

    async fn delete_plugin_if_exist(&self, req: &PluginRequest) -> ControlPlaneResult<()> {
        self.record("delete_plugin_if_exist", &req.name)
    }

    async fn create_credential(&self, req: &CredentialRequest) -> ControlPlaneResult<CredentialResponse> {
        self.record("create_credential", &req.plugin_name)?;
        Ok(CredentialResponse {
            id: self.id("cred"),
            consumer_id: req.consumer_id.clone(),
            plugin_name: req.plugin_name.clone(),
            config: req.config.clone(),
        })
    }

    async fn delete_credential(
        &self,
        _consumer_id: &str,
        plugin_name: &str,
        credential_id: &str,
    ) -> ControlPlaneResult<()> {
        self.record("delete_credential", &format!("{}/{}", plugin_name, credential_id))
    }

    async fn get_credential_list(
        &self,
        _consumer_id: &str,
        plugin_name: &str,
    ) -> ControlPlaneResult<Vec<CredentialResponse>> {
        self.record("get_credential_list", plugin_name)?;
        Ok(Vec::new())
    }

    async fn create_acl_group(&self, consumer_id: &str, group: &str) -> ControlPlaneResult<()> {
        self.record("create_acl_group", &format!("{}/{}", consumer_id, group))
    }

    async fn create_upstream(&self, req: &UpstreamRequest) -> ControlPlaneResult<UpstreamResponse> {
        self.record("create_upstream", &req.name)?;
        Ok(UpstreamResponse {
            id: self.id("upstream"),
            name: req.name.clone(),
        })
    }

    async fn add_upstream_target(
        &self,
        upstream_id: &str,
        req: &UpstreamTargetRequest,
    ) -> ControlPlaneResult<UpstreamTargetResponse> {
        self.record("add_upstream_target", upstream_id)?;
        Ok(UpstreamTargetResponse {
            id: self.id("target"),
            target: req.target.clone(),
            weight: req.weight,
        })
    }

    async fn get_upstream_status(&self, upstream_id: &str) -> ControlPlaneResult<UpstreamStatus> {
        self.record("get_upstream_status", upstream_id)?;
        Ok(UpstreamStatus::default())
    }

    async fn delete_upstream_target(&self, upstream_id: &str, target_id: &str) -> ControlPlaneResult<()> {
        self.record("delete_upstream_target", &format!("{}/{}", upstream_id, target_id))
    }
}

fn plugin_response(req: &PluginRequest, id: String) -> PluginResponse {
    PluginResponse {
        id,
        name: req.name.clone(),
        route: req.route.clone(),
        service: req.service.clone(),
        consumer: req.consumer.clone(),
        config: req.config.clone(),
        enabled: true,
    }
}

/// One recorded `create_or_update_ingress` call
#[derive(Debug, Clone)]
pub struct IngressWrite {
    pub namespace: String,
    pub name: String,
    pub routes: Vec<IngressRoute>,
    pub backend: IngressBackendRef,
    pub provider: String,
    pub options: RouteOptions,
}

/// Ingress client that records writes and deletes
#[derive(Default)]
pub struct FakeIngress {
    pub writes: Mutex<Vec<IngressWrite>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub fail_writes: Mutex<bool>,
    pub https_supported: Mutex<bool>,
    pub service_port: Mutex<Option<u16>>,
}

impl FakeIngress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }

    pub fn writes(&self) -> Vec<IngressWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.writes().len() + self.deletes().len()
    }
}

#[async_trait]
impl IngressClient for FakeIngress {
    async fn create_or_update_ingress(
        &self,
        namespace: &str,
        name: &str,
        routes: &[IngressRoute],
        backend: &IngressBackendRef,
        provider: &str,
        options: &RouteOptions,
    ) -> ControlPlaneResult<bool> {
        let existed = self
            .writes
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.namespace == namespace && w.name == name);
        self.writes.lock().unwrap().push(IngressWrite {
            namespace: namespace.to_string(),
            name: name.to_string(),
            routes: routes.to_vec(),
            backend: backend.clone(),
            provider: provider.to_string(),
            options: options.clone(),
        });
        if *self.fail_writes.lock().unwrap() {
            return Err(ControlPlaneError::ingress("injected ingress failure"));
        }
        Ok(existed)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ControlPlaneResult<()> {
        self.deletes
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn service_port(&self, _namespace: &str, _name: &str) -> ControlPlaneResult<Option<u16>> {
        Ok(*self.service_port.lock().unwrap())
    }

    async fn gateway_supports_https(&self, _namespace: &str, _service: &str) -> ControlPlaneResult<bool> {
        Ok(*self.https_supported.lock().unwrap())
    }
}

/// Everything a test needs to drive the control plane
pub struct Harness {
    pub control_plane: ControlPlane,
    pub store: Arc<MemoryStore>,
    pub adapter: Arc<FakeAdapter>,
    pub ingress: Arc<FakeIngress>,
}

pub fn policy(id: &str, plugin: &str, category: PolicyCategory) -> Policy {
    Policy {
        id: id.to_string(),
        plugin_name: plugin.to_string(),
        category,
        config: json!({}),
        min_gateway_version: None,
    }
}

pub fn test_config() -> ControlPlaneConfig {
    let mut config = ControlPlaneConfig::default();
    config.clusters.insert(
        CLUSTER.to_string(),
        ClusterConfig {
            admin_addr: Some("http://127.0.0.1:8001".to_string()),
            outer_endpoint: "api.example.com".to_string(),
            platform: ClusterPlatform::Kubernetes,
            gateway_namespace: "kong".to_string(),
            gateway_service: "kong".to_string(),
            ..Default::default()
        },
    );
    config.policies = vec![
        policy("key-auth", "key-auth", PolicyCategory::Auth),
        policy("oauth2", "oauth2", PolicyCategory::Auth),
        policy("rate", "rate-limiting", PolicyCategory::TrafficControl),
        policy("cors", "cors", PolicyCategory::Safety),
        policy("acl", "acl", PolicyCategory::Basic),
    ];
    config
}

pub async fn harness() -> Harness {
    harness_with(test_config(), FakeAdapter::new()).await
}

pub async fn harness_with(config: ControlPlaneConfig, adapter: FakeAdapter) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(adapter);
    let ingress = Arc::new(FakeIngress::new());
    let registry = Arc::new(IngressRegistry::new());
    registry.register(CLUSTER, ingress.clone());

    let control_plane = ControlPlane::new(config, store.clone(), registry);
    control_plane.registry().register(CLUSTER, adapter.clone());
    control_plane.seed_policies().await.unwrap();

    Harness {
        control_plane,
        store,
        adapter,
        ingress,
    }
}

pub fn address_request(path: &str, method: Option<&str>, address: &str, consumer: &str) -> ApiRequest {
    ApiRequest {
        cluster_name: CLUSTER.to_string(),
        org_id: "1".to_string(),
        project_id: "7".to_string(),
        env: "TEST".to_string(),
        path: path.to_string(),
        method: method.map(str::to_string),
        hosts: Vec::new(),
        target: RouteTarget::Address {
            address: address.to_string(),
            path: String::new(),
        },
        policies: Vec::new(),
        scope: RouteScope::Consumer(consumer.to_string()),
        net_visibility: Default::default(),
        upstream_api_id: None,
        zone_id: None,
    }
}
