//! # Self-hosted Admin API Adapter
//!
//! Drives a self-hosted gateway through its REST admin API using `reqwest`.
//!
//! ## Conventions
//! - `POST <root>` creates, `PUT <root><id>` updates in place
//! - Deletes accept `404` as success
//! - A `400` on a route means the backend rejected the request as invalid
//! - `GET /` reports the node version and the enabled plugin list; plugins
//!   missing from that list are skipped with a warning

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::core::config::AdminClientConfig;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::gateway::dto::*;
use crate::gateway::version::GatewayVersion;
use crate::gateway::{AdapterCapabilities, GatewayAdapter, IngressBackend};
use crate::observability::CallTimer;

const CONSUMER_ROOT: &str = "/consumers/";
const SERVICE_ROOT: &str = "/services/";
const ROUTE_ROOT: &str = "/routes/";
const PLUGIN_ROOT: &str = "/plugins/";
const UPSTREAM_ROOT: &str = "/upstreams/";
const ACL_ROOT: &str = "/acls/";
const HEALTH_PATH: &str = "/health/";
const TARGET_PATH: &str = "/targets/";

const HMAC_AUTH: &str = "hmac-auth";

/// Subset of the `GET /` node information we read
#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    version: String,
    #[serde(default)]
    configuration: NodeConfiguration,
}

#[derive(Debug, Deserialize, Default)]
struct NodeConfiguration {
    #[serde(default)]
    plugins: Vec<String>,
}

/// Adapter for the self-hosted admin API
pub struct AdminApiAdapter {
    client: Client,
    base_url: String,
}

impl AdminApiAdapter {
    pub fn new(admin_addr: &str, config: &AdminClientConfig) -> ControlPlaneResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ControlPlaneError::config(format!("Failed to build admin client: {}", e)))?;

        Ok(Self {
            client,
            base_url: admin_addr.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn execute(&self, builder: RequestBuilder) -> ControlPlaneResult<(StatusCode, String)> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> ControlPlaneResult<T> {
        serde_json::from_str(body).map_err(|e| ControlPlaneError::Json {
            message: format!("{}: {} body[{}]", operation, e, body),
        })
    }

    async fn node_info(&self) -> ControlPlaneResult<NodeInfo> {
        let (status, body) = self.execute(self.request(Method::GET, "/")).await?;
        if status != StatusCode::OK {
            return Err(ControlPlaneError::backend("GetVersion", status, body));
        }
        Self::decode("GetVersion", &body)
    }

    async fn parsed_version(&self) -> ControlPlaneResult<GatewayVersion> {
        let raw = self.get_version().await?;
        GatewayVersion::parse(&raw)
            .ok_or_else(|| ControlPlaneError::internal(format!("unparseable gateway version '{}'", raw)))
    }

    async fn delete_entity(
        &self,
        operation: &'static str,
        path: String,
        strict_no_content: bool,
    ) -> ControlPlaneResult<()> {
        let timer = CallTimer::start(operation);
        let (status, body) = self.execute(self.request(Method::DELETE, &path)).await?;
        timer.finish();
        let ok = if strict_no_content {
            status == StatusCode::NO_CONTENT
        } else {
            status.as_u16() < 300
        };
        if ok || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(ControlPlaneError::backend(operation, status, body))
    }

    async fn plugin_enabled_or_warn(&self, req: &PluginRequest) -> ControlPlaneResult<bool> {
        let enabled = self.check_plugin_enabled(&req.name).await?;
        if !enabled {
            warn!(plugin = %req.name, "plugin not enabled on gateway, skipping");
        }
        Ok(enabled)
    }

    fn credential_from_value(consumer_id: &str, plugin_name: &str, mut value: Value) -> ControlPlaneResult<CredentialResponse> {
        if plugin_name == HMAC_AUTH {
            if let Some(obj) = value.as_object_mut() {
                if let Some(username) = obj.remove("username") {
                    obj.insert("key".to_string(), username);
                }
            }
        }
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlPlaneError::internal(format!("{} credential without id", plugin_name)))?
            .to_string();
        Ok(CredentialResponse {
            id,
            consumer_id: consumer_id.to_string(),
            plugin_name: plugin_name.to_string(),
            config: value,
        })
    }
}

#[async_trait]
impl GatewayAdapter for AdminApiAdapter {
    fn provider(&self) -> &'static str {
        "admin-api"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            host_check: true,
            domain_policy: true,
            remote_credentials: true,
            ingress_backend: IngressBackend::GatewayService,
            ingress_for_package_zones: true,
        }
    }

    fn gateway_provider_exist(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn get_version(&self) -> ControlPlaneResult<String> {
        Ok(self.node_info().await?.version)
    }

    async fn check_plugin_enabled(&self, plugin_name: &str) -> ControlPlaneResult<bool> {
        let info = self.node_info().await?;
        Ok(info.configuration.plugins.iter().any(|p| p == plugin_name))
    }

    async fn create_consumer(&self, req: &ConsumerRequest) -> ControlPlaneResult<ConsumerResponse> {
        let (status, body) = self
            .execute(self.request(Method::POST, CONSUMER_ROOT).json(req))
            .await?;
        if status == StatusCode::CREATED {
            return Self::decode("CreateConsumer", &body);
        }
        Err(ControlPlaneError::backend("CreateConsumer", status, body))
    }

    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()> {
        if id.is_empty() {
            return Err(ControlPlaneError::invalid_request("consumer_id", "empty"));
        }
        self.delete_entity("DeleteConsumer", format!("{}{}", CONSUMER_ROOT, id), true)
            .await
    }

    async fn create_or_update_service(&self, req: &ServiceRequest) -> ControlPlaneResult<ServiceResponse> {
        let timer = CallTimer::start("CreateOrUpdateService");
        let mut body_req = req.clone();
        let builder = match body_req.id.take() {
            Some(id) => self.request(Method::PUT, &format!("{}{}", SERVICE_ROOT, id)),
            None => self.request(Method::POST, SERVICE_ROOT),
        };
        let (status, body) = self.execute(builder.json(&body_req)).await?;
        timer.finish();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Self::decode("CreateOrUpdateService", &body);
        }
        Err(ControlPlaneError::backend("CreateOrUpdateService", status, body))
    }

    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()> {
        if id.is_empty() {
            return Err(ControlPlaneError::invalid_request("service_id", "empty"));
        }
        self.delete_entity("DeleteService", format!("{}{}", SERVICE_ROOT, id), false)
            .await
    }

    async fn create_or_update_route(&self, req: &RouteRequest) -> ControlPlaneResult<RouteResponse> {
        let timer = CallTimer::start("CreateOrUpdateRoute");
        let version = self.parsed_version().await?;
        let mut body_req = req.clone();
        body_req.adjust(version);
        let builder = match body_req.id.take() {
            Some(id) => self.request(Method::PUT, &format!("{}{}", ROUTE_ROOT, id)),
            None => self.request(Method::POST, ROUTE_ROOT),
        };
        let (status, body) = self.execute(builder.json(&body_req)).await?;
        timer.finish();
        match status {
            StatusCode::OK | StatusCode::CREATED => Self::decode("CreateOrUpdateRoute", &body),
            StatusCode::BAD_REQUEST => {
                warn!(status = status.as_u16(), body = %body, "route rejected by gateway");
                Err(ControlPlaneError::invalid_request("route", body))
            }
            _ => Err(ControlPlaneError::backend("CreateOrUpdateRoute", status, body)),
        }
    }

    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()> {
        if id.is_empty() {
            return Err(ControlPlaneError::invalid_request("route_id", "empty"));
        }
        self.delete_entity("DeleteRoute", format!("{}{}", ROUTE_ROOT, id), false)
            .await
    }

    async fn touch_route_oauth_method(&self, route_id: &str) -> ControlPlaneResult<()> {
        let (status, body) = self
            .execute(self.request(Method::GET, &format!("{}{}", ROUTE_ROOT, route_id)))
            .await?;
        if status != StatusCode::OK {
            return Err(ControlPlaneError::backend("GetRoute", status, body));
        }
        let route: RouteResponse = Self::decode("GetRoute", &body)?;
        let has_post = route
            .methods
            .as_ref()
            .map(|methods| methods.iter().any(|m| m.eq_ignore_ascii_case("POST")))
            .unwrap_or(true);
        if has_post {
            return Ok(());
        }

        let base_path = route
            .paths
            .as_ref()
            .and_then(|paths| paths.first())
            .cloned()
            .unwrap_or_default();
        let service = route
            .service
            .clone()
            .ok_or_else(|| ControlPlaneError::internal(format!("route {} has no service", route_id)))?;
        let companion = json!({
            "protocols": ["http", "https"],
            "methods": ["POST"],
            "hosts": route.hosts.clone().unwrap_or_default(),
            "paths": [format!("{}/oauth2/token", base_path), format!("{}/oauth2/authorize", base_path)],
            "service": service,
        });
        let (status, body) = self
            .execute(self.request(Method::POST, ROUTE_ROOT).json(&companion))
            .await?;
        if status == StatusCode::OK || status == StatusCode::CREATED {
            debug!(route_id, "created oauth2 companion route");
            return Ok(());
        }
        Err(ControlPlaneError::backend("TouchRouteOAuthMethod", status, body))
    }

    async fn get_routes_with_tag(&self, tag: &str) -> ControlPlaneResult<Vec<RouteResponse>> {
        let (status, body) = self
            .execute(self.request(Method::GET, ROUTE_ROOT).query(&[("tags", tag)]))
            .await?;
        if status == StatusCode::OK {
            let list: RouteList = Self::decode("GetRoutesWithTag", &body)?;
            return Ok(list.data);
        }
        Err(ControlPlaneError::backend("GetRoutesWithTag", status, body))
    }

    async fn create_or_update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        let timer = CallTimer::start("CreateOrUpdatePlugin");
        if !self.plugin_enabled_or_warn(req).await? {
            return Ok(None);
        }
        let result = match self.get_plugin(req).await? {
            Some(existing) => self.update_plugin(&req.clone().with_id(existing.id)).await,
            None => self.add_plugin(req).await,
        };
        timer.finish();
        result
    }

    async fn add_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        if !self.plugin_enabled_or_warn(req).await? {
            return Ok(None);
        }
        let (status, body) = self
            .execute(self.request(Method::POST, PLUGIN_ROOT).json(req))
            .await?;
        if status == StatusCode::CREATED {
            return Self::decode("AddPlugin", &body).map(Some);
        }
        Err(ControlPlaneError::backend("AddPlugin", status, body))
    }

    async fn update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        if !self.plugin_enabled_or_warn(req).await? {
            return Ok(None);
        }
        let mut body_req = req.clone();
        let id = body_req
            .id
            .take()
            .ok_or_else(|| ControlPlaneError::invalid_request("plugin_id", "required for update"))?;
        let (status, body) = self
            .execute(self.request(Method::PUT, &format!("{}{}", PLUGIN_ROOT, id)).json(&body_req))
            .await?;
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Self::decode("UpdatePlugin", &body).map(Some);
        }
        Err(ControlPlaneError::backend("UpdatePlugin", status, body))
    }

    async fn remove_plugin(&self, id: &str) -> ControlPlaneResult<()> {
        if id.is_empty() {
            return Err(ControlPlaneError::invalid_request("plugin_id", "empty"));
        }
        self.delete_entity("RemovePlugin", format!("{}{}", PLUGIN_ROOT, id), true)
            .await
    }

    async fn get_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>> {
        if req.name.is_empty() {
            return Err(ControlPlaneError::invalid_request("plugin_name", "empty"));
        }
        let (status, body) = self
            .execute(self.request(Method::GET, PLUGIN_ROOT).query(&req.lookup_query()))
            .await?;
        if status == StatusCode::OK {
            let list: PluginList = Self::decode("GetPlugin", &body)?;
            return Ok(list.data.into_iter().next());
        }
        Err(ControlPlaneError::backend("GetPlugin", status, body))
    }

    async fn delete_plugin_if_exist(&self, req: &PluginRequest) -> ControlPlaneResult<()> {
        if !self.plugin_enabled_or_warn(req).await? {
            return Ok(());
        }
        match self.get_plugin(req).await? {
            Some(existing) => self.remove_plugin(&existing.id).await,
            None => Ok(()),
        }
    }

    async fn create_credential(&self, req: &CredentialRequest) -> ControlPlaneResult<CredentialResponse> {
        let mut config = req.config.clone();
        if req.plugin_name == HMAC_AUTH {
            if let Some(obj) = config.as_object_mut() {
                if let Some(key) = obj.remove("key") {
                    obj.insert("username".to_string(), key);
                }
            }
        }
        let path = format!("{}{}/{}", CONSUMER_ROOT, req.consumer_id, req.plugin_name);
        let (status, body) = self
            .execute(self.request(Method::POST, &path).json(&config))
            .await?;
        if status == StatusCode::CREATED {
            let value: Value = Self::decode("CreateCredential", &body)?;
            return Self::credential_from_value(&req.consumer_id, &req.plugin_name, value);
        }
        Err(ControlPlaneError::backend("CreateCredential", status, body))
    }

    async fn delete_credential(
        &self,
        consumer_id: &str,
        plugin_name: &str,
        credential_id: &str,
    ) -> ControlPlaneResult<()> {
        let path = format!("{}{}/{}/{}", CONSUMER_ROOT, consumer_id, plugin_name, credential_id);
        self.delete_entity("DeleteCredential", path, true).await
    }

    async fn get_credential_list(
        &self,
        consumer_id: &str,
        plugin_name: &str,
    ) -> ControlPlaneResult<Vec<CredentialResponse>> {
        let path = format!("{}{}/{}", CONSUMER_ROOT, consumer_id, plugin_name);
        let (status, body) = self.execute(self.request(Method::GET, &path)).await?;
        if status != StatusCode::OK {
            return Err(ControlPlaneError::backend("GetCredentialList", status, body));
        }

        #[derive(Deserialize)]
        struct CredentialPage {
            #[serde(default)]
            data: Vec<Value>,
        }

        let page: CredentialPage = Self::decode("GetCredentialList", &body)?;
        page.data
            .into_iter()
            .map(|value| Self::credential_from_value(consumer_id, plugin_name, value))
            .collect()
    }

    async fn create_acl_group(&self, consumer_id: &str, group: &str) -> ControlPlaneResult<()> {
        if consumer_id.is_empty() || group.is_empty() {
            return Err(ControlPlaneError::invalid_request("acl_group", "consumer id and group required"));
        }
        let path = format!("{}{}{}", CONSUMER_ROOT, consumer_id, ACL_ROOT);
        let (status, body) = self
            .execute(self.request(Method::POST, &path).json(&json!({ "group": group })))
            .await?;
        if status.as_u16() < 300 {
            return Ok(());
        }
        Err(ControlPlaneError::backend("CreateAclGroup", status, body))
    }

    async fn create_upstream(&self, req: &UpstreamRequest) -> ControlPlaneResult<UpstreamResponse> {
        let (status, body) = self
            .execute(self.request(Method::POST, UPSTREAM_ROOT).json(req))
            .await?;
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Self::decode("CreateUpstream", &body);
        }
        Err(ControlPlaneError::backend("CreateUpstream", status, body))
    }

    async fn add_upstream_target(
        &self,
        upstream_id: &str,
        req: &UpstreamTargetRequest,
    ) -> ControlPlaneResult<UpstreamTargetResponse> {
        if upstream_id.is_empty() {
            return Err(ControlPlaneError::invalid_request("upstream_id", "empty"));
        }
        let path = format!("{}{}{}", UPSTREAM_ROOT, upstream_id, TARGET_PATH);
        let (status, body) = self.execute(self.request(Method::POST, &path).json(req)).await?;
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Self::decode("AddUpstreamTarget", &body);
        }
        Err(ControlPlaneError::backend("AddUpstreamTarget", status, body))
    }

    async fn get_upstream_status(&self, upstream_id: &str) -> ControlPlaneResult<UpstreamStatus> {
        if upstream_id.is_empty() {
            return Err(ControlPlaneError::invalid_request("upstream_id", "empty"));
        }
        let path = format!("{}{}{}", UPSTREAM_ROOT, upstream_id, HEALTH_PATH);
        let (status, body) = self.execute(self.request(Method::GET, &path)).await?;
        if status == StatusCode::OK {
            return Self::decode("GetUpstreamStatus", &body);
        }
        Err(ControlPlaneError::backend("GetUpstreamStatus", status, body))
    }

    async fn delete_upstream_target(&self, upstream_id: &str, target_id: &str) -> ControlPlaneResult<()> {
        if upstream_id.is_empty() || target_id.is_empty() {
            return Err(ControlPlaneError::invalid_request("upstream_target", "upstream and target ids required"));
        }
        let path = format!("{}{}{}{}", UPSTREAM_ROOT, upstream_id, TARGET_PATH, target_id);
        self.delete_entity("DeleteUpstreamTarget", path, true).await
    }
}
