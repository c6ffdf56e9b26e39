//! # Domain Types
//!
//! Rows persisted by the control plane and the caller-facing request shapes.
//!
//! ## Ownership
//! - A [`Route`] exclusively owns its single [`Service`]
//! - A [`Route`] weakly references its [`Zone`] by id
//! - A [`Zone`] weakly references a Kubernetes Ingress by name; the cluster is
//!   authoritative for the Ingress, the row only remembers that it exists

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Whether a route is reachable only from inside the cluster network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetVisibility {
    Inner,
    #[default]
    Outer,
}

/// Category of a policy template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyCategory {
    Auth,
    Basic,
    Safety,
    TrafficControl,
}

/// Kind of routing zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneType {
    Package,
    PackageApi,
    Unity,
    Runtime,
}

/// Lifecycle of a route row.
///
/// `Provisioning -> Active`, `Active -> Updating -> Active | Failed`,
/// `Active -> Deleting -> (row removed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouteState {
    #[default]
    Provisioning,
    Active,
    Updating,
    Failed,
    Deleting,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Updating => "updating",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// Binding that owns a route for uniqueness purposes. The two are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum RouteScope {
    Consumer(String),
    RuntimeService(String),
}

impl RouteScope {
    pub fn consumer_id(&self) -> Option<&str> {
        match self {
            Self::Consumer(id) => Some(id),
            Self::RuntimeService(_) => None,
        }
    }

    pub fn runtime_service_id(&self) -> Option<&str> {
        match self {
            Self::RuntimeService(id) => Some(id),
            Self::Consumer(_) => None,
        }
    }
}

/// Where an exposed route forwards to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RouteTarget {
    /// Explicit upstream address such as `http://orders.svc:8080`
    Address {
        address: String,
        #[serde(default)]
        path: String,
    },
    /// A runtime deployment resolved through the runtime-service record
    Runtime {
        runtime_id: String,
        app: String,
        service: String,
        #[serde(default)]
        path: String,
    },
}

impl RouteTarget {
    pub fn path(&self) -> &str {
        match self {
            Self::Address { path, .. } | Self::Runtime { path, .. } => path,
        }
    }
}

/// Caller-facing request to expose an API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub cluster_name: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub env: String,
    pub path: String,
    /// `None` means any method
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    pub target: RouteTarget,
    /// Policy template ids from the catalog
    #[serde(default)]
    pub policies: Vec<String>,
    pub scope: RouteScope,
    #[serde(default)]
    pub net_visibility: NetVisibility,
    #[serde(default)]
    pub upstream_api_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// Persisted route row (a published API)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub cluster_name: String,
    pub org_id: String,
    pub project_id: String,
    pub env: String,
    pub path: String,
    pub method: Option<String>,
    pub hosts: Vec<String>,
    pub target_address: String,
    pub target_rewrite_path: String,
    pub regex_path: bool,
    pub need_auth: bool,
    pub net_visibility: NetVisibility,
    pub consumer_id: Option<String>,
    pub runtime_service_id: Option<String>,
    pub upstream_api_id: Option<String>,
    pub policies: Vec<String>,
    pub backend_route_id: Option<String>,
    pub service_id: Option<String>,
    pub zone_id: Option<String>,
    pub state: RouteState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn scope(&self) -> Option<RouteScope> {
        match (&self.consumer_id, &self.runtime_service_id) {
            (Some(id), _) => Some(RouteScope::Consumer(id.clone())),
            (None, Some(id)) => Some(RouteScope::RuntimeService(id.clone())),
            (None, None) => None,
        }
    }

    /// Method label used in logs and conflict reports
    pub fn method_label(&self) -> &str {
        self.method.as_deref().unwrap_or("*")
    }

    pub fn host_set(&self) -> BTreeSet<&str> {
        self.hosts.iter().map(String::as_str).collect()
    }
}

/// Upstream target row, one per route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub route_id: String,
    pub backend_id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path_prefix: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retries: u32,
}

/// A plugin attached to a route, service or consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInstance {
    pub id: String,
    pub plugin_name: String,
    pub backend_id: String,
    pub route_id: Option<String>,
    pub service_id: Option<String>,
    pub consumer_id: Option<String>,
    pub config: Value,
    /// Catalog policy this instance came from; `None` for structural plugins
    pub policy_id: Option<String>,
    pub enabled: bool,
}

/// Policy template in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub plugin_name: String,
    pub category: PolicyCategory,
    #[serde(default)]
    pub config: Value,
    /// Oldest backend version the plugin works on, e.g. `"1.0.0"`
    #[serde(default)]
    pub min_gateway_version: Option<String>,
}

/// Identity used for auth and ACL scoping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub id: String,
    pub name: String,
    pub org_id: String,
    pub project_id: String,
    pub env: String,
    pub cluster_name: String,
    /// Name registered on the gateway backend
    pub backend_name: String,
    pub backend_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A stored credential owned by a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub consumer_id: String,
    /// Auth plugin the credential belongs to, e.g. `key-auth`
    pub plugin_name: String,
    pub config: Value,
}

/// Runtime deployment a route can be bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeService {
    pub id: String,
    pub runtime_id: String,
    pub app_name: String,
    pub service_name: String,
    pub group_name: String,
    pub project_namespace: String,
    pub cluster_name: String,
    pub port: u16,
}

impl RuntimeService {
    /// In-cluster DNS address of the service
    pub fn inner_address(&self) -> String {
        format!(
            "http://{}.{}.svc.cluster.local:{}",
            self.service_name, self.project_namespace, self.port
        )
    }

    /// Name of the Kubernetes service backing a runtime deployment
    pub fn backend_service_name(&self) -> String {
        if self.group_name.is_empty() {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.group_name)
        }
    }
}

/// Logical routing unit, optionally backed by an Ingress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub cluster_name: String,
    pub project_id: String,
    pub env: String,
    pub zone_type: ZoneType,
    pub has_ingress: bool,
    pub ingress_namespace: Option<String>,
    /// Serialized [`ZoneKongPolicies`]
    pub kong_policies: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ordering/regex policy entry a zone contributes to the domain policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ZoneKongPolicies {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub enables: String,
    #[serde(default)]
    pub disables: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub env: String,
}

/// A set of APIs granted to consumers as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    /// Zone of `package` and `unity` packages
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// Package membership of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageApi {
    pub package_id: String,
    pub route_id: String,
}
