//! # Persistence Seams
//!
//! Narrow async traits over the relational tables the control plane writes
//! through. Provisioners depend on [`Store`], the union of all of them, so
//! tests and deployments can substitute any backing implementation.
//!
//! The route existence check and the following insert are separate calls with
//! no lock or transaction around them. Two concurrent creates for the same
//! (path, method, hosts) can both pass the check; a backing store that needs a
//! hard guarantee should add a uniqueness constraint on those columns.

pub mod memory;

use async_trait::async_trait;

use crate::core::error::ControlPlaneResult;
use crate::core::types::*;

pub use memory::MemoryStore;

#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn insert_route(&self, route: &Route) -> ControlPlaneResult<()>;
    async fn update_route(&self, route: &Route) -> ControlPlaneResult<()>;
    async fn get_route(&self, id: &str) -> ControlPlaneResult<Option<Route>>;
    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()>;
    /// Routes with exactly this path and method inside `scope`
    async fn find_routes(&self, path: &str, method: Option<&str>, scope: &RouteScope) -> ControlPlaneResult<Vec<Route>>;
    async fn list_routes_by_scope(&self, scope: &RouteScope) -> ControlPlaneResult<Vec<Route>>;
    async fn list_routes_by_zone(&self, zone_id: &str) -> ControlPlaneResult<Vec<Route>>;
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn insert_service(&self, service: &Service) -> ControlPlaneResult<()>;
    async fn update_service(&self, service: &Service) -> ControlPlaneResult<()>;
    async fn get_service_by_route(&self, route_id: &str) -> ControlPlaneResult<Option<Service>>;
    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()>;
}

#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn insert_plugin(&self, plugin: &PluginInstance) -> ControlPlaneResult<()>;
    async fn update_plugin(&self, plugin: &PluginInstance) -> ControlPlaneResult<()>;
    async fn list_plugins_by_route(&self, route_id: &str) -> ControlPlaneResult<Vec<PluginInstance>>;
    async fn delete_plugin(&self, id: &str) -> ControlPlaneResult<()>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn upsert_policy(&self, policy: &Policy) -> ControlPlaneResult<()>;
    async fn get_policy(&self, id: &str) -> ControlPlaneResult<Option<Policy>>;
    async fn list_policies_by_category(&self, category: PolicyCategory) -> ControlPlaneResult<Vec<Policy>>;
}

#[async_trait]
pub trait ConsumerStore: Send + Sync {
    async fn insert_consumer(&self, consumer: &Consumer) -> ControlPlaneResult<()>;
    async fn get_consumer(&self, id: &str) -> ControlPlaneResult<Option<Consumer>>;
    async fn find_consumer(
        &self,
        org_id: &str,
        project_id: &str,
        env: &str,
        name: &str,
    ) -> ControlPlaneResult<Option<Consumer>>;
    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_credential(&self, credential: &Credential) -> ControlPlaneResult<()>;
    async fn list_credentials(&self, consumer_id: &str) -> ControlPlaneResult<Vec<Credential>>;
    async fn delete_credential(&self, id: &str) -> ControlPlaneResult<()>;
}

#[async_trait]
pub trait ZoneStore: Send + Sync {
    async fn insert_zone(&self, zone: &Zone) -> ControlPlaneResult<()>;
    async fn update_zone(&self, zone: &Zone) -> ControlPlaneResult<()>;
    async fn get_zone(&self, id: &str) -> ControlPlaneResult<Option<Zone>>;
    async fn delete_zone(&self, id: &str) -> ControlPlaneResult<()>;
    async fn list_zones_by_cluster(&self, cluster_name: &str) -> ControlPlaneResult<Vec<Zone>>;
}

/// Package membership of routes and package grants of consumers
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn insert_package(&self, package: &Package) -> ControlPlaneResult<()>;
    async fn get_package(&self, id: &str) -> ControlPlaneResult<Option<Package>>;
    async fn find_package_by_zone(&self, zone_id: &str) -> ControlPlaneResult<Option<Package>>;
    async fn add_package_api(&self, link: &PackageApi) -> ControlPlaneResult<()>;
    async fn packages_for_route(&self, route_id: &str) -> ControlPlaneResult<Vec<String>>;
    async fn remove_route_from_packages(&self, route_id: &str) -> ControlPlaneResult<()>;
    async fn grant_package(&self, package_id: &str, consumer_id: &str) -> ControlPlaneResult<()>;
    async fn package_grants(&self, consumer_id: &str) -> ControlPlaneResult<Vec<String>>;
    async fn revoke_consumer_grants(&self, consumer_id: &str) -> ControlPlaneResult<()>;
}

#[async_trait]
pub trait RuntimeServiceStore: Send + Sync {
    async fn insert_runtime_service(&self, service: &RuntimeService) -> ControlPlaneResult<()>;
    async fn get_runtime_service(&self, id: &str) -> ControlPlaneResult<Option<RuntimeService>>;
    async fn find_runtime_service(
        &self,
        runtime_id: &str,
        app_name: &str,
        service_name: &str,
    ) -> ControlPlaneResult<Option<RuntimeService>>;
}

/// Every table the control plane touches
pub trait Store:
    RouteStore
    + ServiceStore
    + PluginStore
    + PolicyStore
    + ConsumerStore
    + CredentialStore
    + ZoneStore
    + PackageStore
    + RuntimeServiceStore
{
}

impl<T> Store for T where
    T: RouteStore
        + ServiceStore
        + PluginStore
        + PolicyStore
        + ConsumerStore
        + CredentialStore
        + ZoneStore
        + PackageStore
        + RuntimeServiceStore
{
}
