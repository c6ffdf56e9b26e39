//! # Gateway Adapter Module
//!
//! One capability interface, [`GatewayAdapter`], with two independent
//! implementations:
//!
//! - [`admin_api::AdminApiAdapter`] drives a self-hosted gateway through its
//!   REST admin API and validates synchronously
//! - [`managed_cloud::ManagedCloudAdapter`] fronts a managed cloud gateway,
//!   generating ids locally and accepting requests optimistically
//!
//! Callers pick an adapter once per cluster through [`registry::AdapterRegistry`]
//! and never branch on the provider name afterwards; behavioural differences
//! are expressed through [`AdapterCapabilities`].
//!
//! Success from either implementation means "accepted", not "live".

pub mod admin_api;
pub mod dto;
pub mod managed_cloud;
pub mod registry;
pub mod version;

use async_trait::async_trait;

use crate::core::error::ControlPlaneResult;
use dto::*;

pub use admin_api::AdminApiAdapter;
pub use managed_cloud::ManagedCloudAdapter;
pub use registry::AdapterRegistry;
pub use version::GatewayVersion;

/// Provider value that selects the managed cloud family
pub const MANAGED_CLOUD_PROVIDER: &str = "MSE";

/// How the Ingress of a zone reaches its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressBackend {
    /// The Ingress points at the gateway's own service
    GatewayService,
    /// The Ingress points straight at the runtime service
    RuntimeService,
}

/// Behavioural switches of an adapter family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Enforces inner-only routes with the `host-check` plugin
    pub host_check: bool,
    /// Accepts the cluster-wide `domain-policy` plugin
    pub domain_policy: bool,
    /// Stores credentials remotely and can list them
    pub remote_credentials: bool,
    pub ingress_backend: IngressBackend,
    /// Package and unity zones get an Ingress
    pub ingress_for_package_zones: bool,
}

/// Capability interface every gateway backend family implements.
///
/// Create-or-update calls are idempotent on the caller-supplied id: an id that
/// exists is updated in place, a missing id creates and returns a new one.
/// Plugin calls return `Ok(None)` when the backend does not have the plugin
/// enabled.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Short provider label used in logs
    fn provider(&self) -> &'static str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Whether the backend is attached at all
    fn gateway_provider_exist(&self) -> bool;

    async fn get_version(&self) -> ControlPlaneResult<String>;

    async fn check_plugin_enabled(&self, plugin_name: &str) -> ControlPlaneResult<bool>;

    async fn create_consumer(&self, req: &ConsumerRequest) -> ControlPlaneResult<ConsumerResponse>;

    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()>;

    async fn create_or_update_service(&self, req: &ServiceRequest) -> ControlPlaneResult<ServiceResponse>;

    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()>;

    async fn create_or_update_route(&self, req: &RouteRequest) -> ControlPlaneResult<RouteResponse>;

    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()>;

    /// Make sure the oauth2 token endpoints under a route accept POST
    async fn touch_route_oauth_method(&self, route_id: &str) -> ControlPlaneResult<()>;

    async fn get_routes_with_tag(&self, tag: &str) -> ControlPlaneResult<Vec<RouteResponse>>;

    /// Find an existing instance by name and scope, then add or update it
    async fn create_or_update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>>;

    async fn add_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>>;

    /// Replace the plugin identified by `req.id`
    async fn update_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>>;

    async fn remove_plugin(&self, id: &str) -> ControlPlaneResult<()>;

    async fn get_plugin(&self, req: &PluginRequest) -> ControlPlaneResult<Option<PluginResponse>>;

    async fn delete_plugin_if_exist(&self, req: &PluginRequest) -> ControlPlaneResult<()>;

    async fn create_credential(&self, req: &CredentialRequest) -> ControlPlaneResult<CredentialResponse>;

    async fn delete_credential(
        &self,
        consumer_id: &str,
        plugin_name: &str,
        credential_id: &str,
    ) -> ControlPlaneResult<()>;

    async fn get_credential_list(
        &self,
        consumer_id: &str,
        plugin_name: &str,
    ) -> ControlPlaneResult<Vec<CredentialResponse>>;

    async fn create_acl_group(&self, consumer_id: &str, group: &str) -> ControlPlaneResult<()>;

    async fn create_upstream(&self, req: &UpstreamRequest) -> ControlPlaneResult<UpstreamResponse>;

    async fn add_upstream_target(
        &self,
        upstream_id: &str,
        req: &UpstreamTargetRequest,
    ) -> ControlPlaneResult<UpstreamTargetResponse>;

    async fn get_upstream_status(&self, upstream_id: &str) -> ControlPlaneResult<UpstreamStatus>;

    async fn delete_upstream_target(&self, upstream_id: &str, target_id: &str) -> ControlPlaneResult<()>;
}
