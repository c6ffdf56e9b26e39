//! # Configuration Module
//!
//! Loads the control-plane configuration from YAML or JSON, applies
//! `CONTROL_PLANE_*` environment overrides and validates the result.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support
//! - Per-cluster gateway metadata (provider, platform, admin address)
//! - Seed policy catalog loaded into the store at startup

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::Policy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main control-plane configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub logging: LogConfig,

    /// HTTP client settings for the self-hosted admin API
    #[serde(default)]
    pub admin_client: AdminClientConfig,

    /// Host, visibility and port defaults used when provisioning routes
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Cluster metadata keyed by cluster name
    #[serde(default)]
    pub clusters: HashMap<String, ClusterConfig>,

    /// Policy templates seeded into the catalog
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl ControlPlaneConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ControlPlaneResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlPlaneError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ControlPlaneConfig = serde_yaml::from_str(&content)
            .map_err(|e| ControlPlaneError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ControlPlaneResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlPlaneError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ControlPlaneConfig = serde_json::from_str(&content)
            .map_err(|e| ControlPlaneError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the loader by file extension
    pub async fn load<P: AsRef<Path>>(path: P) -> ControlPlaneResult<Self> {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => Self::load_from_json(path).await,
            _ => Self::load_from_file(path).await,
        }
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Recognised variables:
    /// - `CONTROL_PLANE_LOG_LEVEL`, `CONTROL_PLANE_LOG_FORMAT`
    /// - `CONTROL_PLANE_ADMIN_TIMEOUT`, `CONTROL_PLANE_ADMIN_CONNECT_TIMEOUT`
    /// - `CONTROL_PLANE_INNER_HOST`, `CONTROL_PLANE_HAS_ROUTE_INFO`,
    ///   `CONTROL_PLANE_USE_ADMIN_ENDPOINT`
    pub fn apply_env_overrides(&mut self) -> ControlPlaneResult<()> {
        use std::env;

        if let Ok(level) = env::var("CONTROL_PLANE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("CONTROL_PLANE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ControlPlaneError::config(format!(
                        "Invalid CONTROL_PLANE_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(timeout) = env::var("CONTROL_PLANE_ADMIN_TIMEOUT") {
            self.admin_client.timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ControlPlaneError::config(format!("Invalid CONTROL_PLANE_ADMIN_TIMEOUT: {}", e)))?;
        }

        if let Ok(timeout) = env::var("CONTROL_PLANE_ADMIN_CONNECT_TIMEOUT") {
            self.admin_client.connect_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                ControlPlaneError::config(format!("Invalid CONTROL_PLANE_ADMIN_CONNECT_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(host) = env::var("CONTROL_PLANE_INNER_HOST") {
            self.routing.inner_host = host;
        }

        if let Ok(flag) = env::var("CONTROL_PLANE_HAS_ROUTE_INFO") {
            self.routing.has_route_info = flag
                .parse()
                .map_err(|e| ControlPlaneError::config(format!("Invalid CONTROL_PLANE_HAS_ROUTE_INFO: {}", e)))?;
        }

        if let Ok(flag) = env::var("CONTROL_PLANE_USE_ADMIN_ENDPOINT") {
            self.routing.use_admin_endpoint = flag.parse().map_err(|e| {
                ControlPlaneError::config(format!("Invalid CONTROL_PLANE_USE_ADMIN_ENDPOINT: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> ControlPlaneResult<()> {
        let mut errors = Vec::new();

        if self.admin_client.timeout.is_zero() {
            errors.push("admin_client.timeout must be greater than 0".to_string());
        }

        if self.routing.default_service_port == 0 {
            errors.push("routing.default_service_port must be greater than 0".to_string());
        }

        for (name, cluster) in &self.clusters {
            if name.is_empty() {
                errors.push("cluster name cannot be empty".to_string());
            }
            if let Some(addr) = &cluster.admin_addr {
                if let Err(e) = Url::parse(addr) {
                    errors.push(format!("cluster '{}' has invalid admin_addr '{}': {}", name, addr, e));
                }
            }
            if cluster.gateway_provider.is_empty() && cluster.admin_addr.is_none() {
                errors.push(format!(
                    "cluster '{}' uses the admin API provider but has no admin_addr",
                    name
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.id.as_str()) {
                errors.push(format!("duplicate policy id '{}'", policy.id));
            }
            if let Some(version) = &policy.min_gateway_version {
                if crate::gateway::version::GatewayVersion::parse(version).is_none() {
                    errors.push(format!(
                        "policy '{}' has invalid min_gateway_version '{}'",
                        policy.id, version
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(ControlPlaneError::config(format!(
                "Configuration validation failed: {}",
                errors.join(", ")
            )));
        }

        Ok(())
    }

    /// Look up cluster metadata by name
    pub fn cluster(&self, name: &str) -> ControlPlaneResult<&ClusterConfig> {
        self.clusters
            .get(name)
            .ok_or_else(|| ControlPlaneError::config(format!("cluster '{}' is not configured", name)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// HTTP client settings for the admin API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClientConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Route provisioning defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Host every route answers on inside the cluster
    pub inner_host: String,
    /// Hosts allowed through the host-check plugin for inner routes
    pub inner_hosts_allow: Vec<String>,
    /// Attach the `set-route-info` plugin to every route
    pub has_route_info: bool,
    /// Clusters are driven purely through the remote admin API; no Ingress
    pub use_admin_endpoint: bool,
    /// Port of a runtime service when the cluster reports none
    pub default_service_port: u16,
    pub admin_http_port: u16,
    pub admin_https_port: u16,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            inner_host: "gateway.inner".to_string(),
            inner_hosts_allow: vec!["gateway.inner".to_string()],
            has_route_info: false,
            use_admin_endpoint: false,
            default_service_port: 8080,
            admin_http_port: 80,
            admin_https_port: 443,
        }
    }
}

/// Platform a cluster runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterPlatform {
    #[default]
    Kubernetes,
    Edas,
    Other,
}

/// Gateway metadata for one cluster
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterConfig {
    /// Empty selects the self-hosted admin API family
    #[serde(default)]
    pub gateway_provider: String,
    #[serde(default)]
    pub platform: ClusterPlatform,
    #[serde(default)]
    pub admin_addr: Option<String>,
    /// Public host routes get by default
    #[serde(default)]
    pub outer_endpoint: String,
    /// Namespace of the gateway service in the cluster
    #[serde(default = "default_gateway_namespace")]
    pub gateway_namespace: String,
    #[serde(default = "default_gateway_service")]
    pub gateway_service: String,
    /// kubeconfig context for this cluster; the default context when unset
    #[serde(default)]
    pub kube_context: Option<String>,
}

fn default_gateway_namespace() -> String {
    "kong".to_string()
}

fn default_gateway_service() -> String {
    "kong".to_string()
}

impl ClusterConfig {
    /// Whether zones in this cluster may be exposed through an Ingress
    pub fn ingress_capable(&self) -> bool {
        matches!(self.platform, ClusterPlatform::Kubernetes | ClusterPlatform::Edas)
    }
}
