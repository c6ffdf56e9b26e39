//! # Gateway Adapter Request/Response Types
//!
//! Wire-neutral request and response shapes shared by every adapter. Field
//! names follow the admin API's JSON so the self-hosted adapter can send them
//! as-is; the managed adapter only reads them.
//!
//! Every request that can toggle an object carries `enabled` as an explicit
//! tri-state: `None` leaves the backend default in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::gateway::version::GatewayVersion;
use crate::routing::PathTemplate;

/// Reference to another backend object by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

impl EntityRef {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsumerRequest {
    /// Update in place when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerResponse {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub custom_id: Option<String>,
}

/// Upstream service definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ServiceRequest {
    /// Build a service request from an upstream URL such as `http://svc:8080/base`
    pub fn from_address(id: Option<String>, address: &str) -> ControlPlaneResult<Self> {
        let url = Url::parse(address)
            .map_err(|e| ControlPlaneError::invalid_request("redirect_address", format!("{}: {}", address, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ControlPlaneError::invalid_request("redirect_address", format!("{} has no host", address)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.path() {
            "" | "/" => None,
            p => Some(p.to_string()),
        };

        Ok(Self {
            id,
            name: None,
            protocol: url.scheme().to_string(),
            host,
            port,
            path,
            connect_timeout: 60_000,
            read_timeout: 60_000,
            write_timeout: 60_000,
            retries: 5,
            enabled: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub id: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: Option<String>,
}

/// Backend route definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub protocols: Vec<String>,
    /// `None` matches every method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    pub hosts: Vec<String>,
    pub paths: Vec<String>,
    pub strip_path: bool,
    pub preserve_host: bool,
    pub service: EntityRef,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_handling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl RouteRequest {
    pub fn new(service_id: &str, path: String, hosts: Vec<String>, method: Option<&str>) -> Self {
        Self {
            id: None,
            protocols: vec!["http".to_string(), "https".to_string()],
            methods: method.map(|m| vec![m.to_uppercase()]),
            hosts,
            paths: vec![path],
            strip_path: true,
            preserve_host: false,
            service: EntityRef::new(service_id),
            tags: Vec::new(),
            regex_priority: None,
            path_handling: None,
            enabled: None,
        }
    }

    pub fn add_tag(&mut self, key: &str, value: &str) {
        self.tags.push(format!("{}:{}", key, value));
    }

    /// Give regex paths a priority equal to their literal length so more
    /// specific patterns win
    pub fn with_regex_priority(mut self, template: &PathTemplate) -> Self {
        if template.has_variables() {
            self.regex_priority = Some(template.literal_len() as u32);
        }
        self
    }

    /// Fill or strip version-dependent fields.
    ///
    /// From 2.0 the request carries `path_handling = "v1"`; below 1.0 neither
    /// `path_handling` nor `regex_priority` is sent.
    pub fn adjust(&mut self, version: GatewayVersion) {
        if version.uses_path_handling() {
            self.path_handling = Some("v1".to_string());
        } else {
            self.path_handling = None;
        }
        if !version.supports_regex_priority() {
            self.regex_priority = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub id: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(default)]
    pub service: Option<EntityRef>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteList {
    #[serde(default)]
    pub data: Vec<RouteResponse>,
}

/// Plugin attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<EntityRef>,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl PluginRequest {
    pub fn new<S: Into<String>>(name: S, config: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            route: None,
            service: None,
            consumer: None,
            config,
            enabled: None,
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn on_route<S: Into<String>>(mut self, route_id: S) -> Self {
        self.route = Some(EntityRef::new(route_id));
        self
    }

    pub fn on_service<S: Into<String>>(mut self, service_id: S) -> Self {
        self.service = Some(EntityRef::new(service_id));
        self
    }

    pub fn on_consumer<S: Into<String>>(mut self, consumer_id: S) -> Self {
        self.consumer = Some(EntityRef::new(consumer_id));
        self
    }

    /// Query string used to find an existing instance of this plugin
    pub fn lookup_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("name", self.name.clone())];
        if let Some(route) = &self.route {
            query.push(("route_id", route.id.clone()));
        }
        if let Some(service) = &self.service {
            query.push(("service_id", service.id.clone()));
        }
        if let Some(consumer) = &self.consumer {
            query.push(("consumer_id", consumer.id.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub route: Option<EntityRef>,
    #[serde(default)]
    pub service: Option<EntityRef>,
    #[serde(default)]
    pub consumer: Option<EntityRef>,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginList {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub data: Vec<PluginResponse>,
}

/// Credential for an auth plugin, e.g. a key-auth key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub consumer_id: String,
    pub plugin_name: String,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub id: String,
    pub consumer_id: String,
    pub plugin_name: String,
    /// Everything the backend returned for the credential
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpstreamRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthchecks: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTargetRequest {
    pub target: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTargetResponse {
    pub id: String,
    pub target: String,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target: String,
    pub health: String,
}

/// Health of every target behind an upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpstreamStatus {
    #[serde(default)]
    pub data: Vec<TargetHealth>,
}

impl UpstreamStatus {
    pub fn all_healthy(&self) -> bool {
        self.data.iter().all(|t| t.health.eq_ignore_ascii_case("HEALTHY"))
    }
}
