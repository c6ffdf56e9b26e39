//! In-memory store backed by concurrent maps.
//!
//! Used by the binary when no external database is configured and by the test
//! suite. Each table is an independent [`DashMap`]; there are no cross-table
//! transactions.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;

use super::*;
use crate::core::error::ControlPlaneError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    routes: DashMap<String, Route>,
    services: DashMap<String, Service>,
    plugins: DashMap<String, PluginInstance>,
    policies: DashMap<String, Policy>,
    consumers: DashMap<String, Consumer>,
    credentials: DashMap<String, Credential>,
    zones: DashMap<String, Zone>,
    packages: DashMap<String, Package>,
    package_apis: DashMap<String, BTreeSet<String>>,
    package_grants: DashMap<String, BTreeSet<String>>,
    runtime_services: DashMap<String, RuntimeService>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

fn in_scope(route: &Route, scope: &RouteScope) -> bool {
    match scope {
        RouteScope::Consumer(id) => route.consumer_id.as_deref() == Some(id.as_str()),
        RouteScope::RuntimeService(id) => route.runtime_service_id.as_deref() == Some(id.as_str()),
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn insert_route(&self, route: &Route) -> ControlPlaneResult<()> {
        self.routes.insert(route.id.clone(), route.clone());
        Ok(())
    }

    async fn update_route(&self, route: &Route) -> ControlPlaneResult<()> {
        match self.routes.get_mut(&route.id) {
            Some(mut entry) => {
                *entry = route.clone();
                Ok(())
            }
            None => Err(ControlPlaneError::not_found("route", &route.id)),
        }
    }

    async fn get_route(&self, id: &str) -> ControlPlaneResult<Option<Route>> {
        Ok(self.routes.get(id).map(|r| r.clone()))
    }

    async fn delete_route(&self, id: &str) -> ControlPlaneResult<()> {
        self.routes.remove(id);
        Ok(())
    }

    async fn find_routes(&self, path: &str, method: Option<&str>, scope: &RouteScope) -> ControlPlaneResult<Vec<Route>> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.path == path && r.method.as_deref() == method && in_scope(r, scope))
            .map(|r| r.clone())
            .collect())
    }

    async fn list_routes_by_scope(&self, scope: &RouteScope) -> ControlPlaneResult<Vec<Route>> {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .filter(|r| in_scope(r, scope))
            .map(|r| r.clone())
            .collect();
        routes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(routes)
    }

    async fn list_routes_by_zone(&self, zone_id: &str) -> ControlPlaneResult<Vec<Route>> {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .filter(|r| r.zone_id.as_deref() == Some(zone_id))
            .map(|r| r.clone())
            .collect();
        routes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(routes)
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn insert_service(&self, service: &Service) -> ControlPlaneResult<()> {
        self.services.insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn update_service(&self, service: &Service) -> ControlPlaneResult<()> {
        self.services.insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn get_service_by_route(&self, route_id: &str) -> ControlPlaneResult<Option<Service>> {
        Ok(self
            .services
            .iter()
            .find(|s| s.route_id == route_id)
            .map(|s| s.clone()))
    }

    async fn delete_service(&self, id: &str) -> ControlPlaneResult<()> {
        self.services.remove(id);
        Ok(())
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn insert_plugin(&self, plugin: &PluginInstance) -> ControlPlaneResult<()> {
        self.plugins.insert(plugin.id.clone(), plugin.clone());
        Ok(())
    }

    async fn update_plugin(&self, plugin: &PluginInstance) -> ControlPlaneResult<()> {
        self.plugins.insert(plugin.id.clone(), plugin.clone());
        Ok(())
    }

    async fn list_plugins_by_route(&self, route_id: &str) -> ControlPlaneResult<Vec<PluginInstance>> {
        let mut plugins: Vec<PluginInstance> = self
            .plugins
            .iter()
            .filter(|p| p.route_id.as_deref() == Some(route_id))
            .map(|p| p.clone())
            .collect();
        plugins.sort_by(|a, b| a.plugin_name.cmp(&b.plugin_name).then_with(|| a.id.cmp(&b.id)));
        Ok(plugins)
    }

    async fn delete_plugin(&self, id: &str) -> ControlPlaneResult<()> {
        self.plugins.remove(id);
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn upsert_policy(&self, policy: &Policy) -> ControlPlaneResult<()> {
        self.policies.insert(policy.id.clone(), policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: &str) -> ControlPlaneResult<Option<Policy>> {
        Ok(self.policies.get(id).map(|p| p.clone()))
    }

    async fn list_policies_by_category(&self, category: PolicyCategory) -> ControlPlaneResult<Vec<Policy>> {
        let mut policies: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.category == category)
            .map(|p| p.clone())
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }
}

#[async_trait]
impl ConsumerStore for MemoryStore {
    async fn insert_consumer(&self, consumer: &Consumer) -> ControlPlaneResult<()> {
        self.consumers.insert(consumer.id.clone(), consumer.clone());
        Ok(())
    }

    async fn get_consumer(&self, id: &str) -> ControlPlaneResult<Option<Consumer>> {
        Ok(self.consumers.get(id).map(|c| c.clone()))
    }

    async fn find_consumer(
        &self,
        org_id: &str,
        project_id: &str,
        env: &str,
        name: &str,
    ) -> ControlPlaneResult<Option<Consumer>> {
        Ok(self
            .consumers
            .iter()
            .find(|c| c.org_id == org_id && c.project_id == project_id && c.env == env && c.name == name)
            .map(|c| c.clone()))
    }

    async fn delete_consumer(&self, id: &str) -> ControlPlaneResult<()> {
        self.consumers.remove(id);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_credential(&self, credential: &Credential) -> ControlPlaneResult<()> {
        self.credentials.insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn list_credentials(&self, consumer_id: &str) -> ControlPlaneResult<Vec<Credential>> {
        let mut credentials: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|c| c.consumer_id == consumer_id)
            .map(|c| c.clone())
            .collect();
        credentials.sort_by(|a, b| a.plugin_name.cmp(&b.plugin_name).then_with(|| a.id.cmp(&b.id)));
        Ok(credentials)
    }

    async fn delete_credential(&self, id: &str) -> ControlPlaneResult<()> {
        self.credentials.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ZoneStore for MemoryStore {
    async fn insert_zone(&self, zone: &Zone) -> ControlPlaneResult<()> {
        self.zones.insert(zone.id.clone(), zone.clone());
        Ok(())
    }

    async fn update_zone(&self, zone: &Zone) -> ControlPlaneResult<()> {
        match self.zones.get_mut(&zone.id) {
            Some(mut entry) => {
                *entry = zone.clone();
                Ok(())
            }
            None => Err(ControlPlaneError::not_found("zone", &zone.id)),
        }
    }

    async fn get_zone(&self, id: &str) -> ControlPlaneResult<Option<Zone>> {
        Ok(self.zones.get(id).map(|z| z.clone()))
    }

    async fn delete_zone(&self, id: &str) -> ControlPlaneResult<()> {
        self.zones.remove(id);
        Ok(())
    }

    async fn list_zones_by_cluster(&self, cluster_name: &str) -> ControlPlaneResult<Vec<Zone>> {
        let mut zones: Vec<Zone> = self
            .zones
            .iter()
            .filter(|z| z.cluster_name == cluster_name)
            .map(|z| z.clone())
            .collect();
        zones.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(zones)
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn insert_package(&self, package: &Package) -> ControlPlaneResult<()> {
        self.packages.insert(package.id.clone(), package.clone());
        Ok(())
    }

    async fn get_package(&self, id: &str) -> ControlPlaneResult<Option<Package>> {
        Ok(self.packages.get(id).map(|p| p.clone()))
    }

    async fn find_package_by_zone(&self, zone_id: &str) -> ControlPlaneResult<Option<Package>> {
        Ok(self
            .packages
            .iter()
            .find(|p| p.zone_id.as_deref() == Some(zone_id))
            .map(|p| p.clone()))
    }

    async fn add_package_api(&self, link: &PackageApi) -> ControlPlaneResult<()> {
        self.package_apis
            .entry(link.route_id.clone())
            .or_default()
            .insert(link.package_id.clone());
        Ok(())
    }

    async fn packages_for_route(&self, route_id: &str) -> ControlPlaneResult<Vec<String>> {
        Ok(self
            .package_apis
            .get(route_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_route_from_packages(&self, route_id: &str) -> ControlPlaneResult<()> {
        self.package_apis.remove(route_id);
        Ok(())
    }

    async fn grant_package(&self, package_id: &str, consumer_id: &str) -> ControlPlaneResult<()> {
        self.package_grants
            .entry(consumer_id.to_string())
            .or_default()
            .insert(package_id.to_string());
        Ok(())
    }

    async fn package_grants(&self, consumer_id: &str) -> ControlPlaneResult<Vec<String>> {
        Ok(self
            .package_grants
            .get(consumer_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn revoke_consumer_grants(&self, consumer_id: &str) -> ControlPlaneResult<()> {
        self.package_grants.remove(consumer_id);
        Ok(())
    }
}

#[async_trait]
impl RuntimeServiceStore for MemoryStore {
    async fn insert_runtime_service(&self, service: &RuntimeService) -> ControlPlaneResult<()> {
        self.runtime_services.insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn get_runtime_service(&self, id: &str) -> ControlPlaneResult<Option<RuntimeService>> {
        Ok(self.runtime_services.get(id).map(|s| s.clone()))
    }

    async fn find_runtime_service(
        &self,
        runtime_id: &str,
        app_name: &str,
        service_name: &str,
    ) -> ControlPlaneResult<Option<RuntimeService>> {
        Ok(self
            .runtime_services
            .iter()
            .find(|s| s.runtime_id == runtime_id && s.app_name == app_name && s.service_name == service_name)
            .map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn route(id: &str, path: &str, method: Option<&str>, consumer: &str) -> Route {
        let now = Utc::now();
        Route {
            id: id.into(),
            cluster_name: "c".into(),
            org_id: "1".into(),
            project_id: "2".into(),
            env: "TEST".into(),
            path: path.into(),
            method: method.map(str::to_string),
            hosts: vec!["a.example".into()],
            target_address: "http://up:8080".into(),
            target_rewrite_path: String::new(),
            regex_path: false,
            need_auth: false,
            net_visibility: NetVisibility::Outer,
            consumer_id: Some(consumer.into()),
            runtime_service_id: None,
            upstream_api_id: None,
            policies: vec![],
            backend_route_id: None,
            service_id: None,
            zone_id: None,
            state: RouteState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_find_routes_is_scoped() {
        let store = MemoryStore::new();
        store.insert_route(&route("r1", "/a", Some("GET"), "c1")).await.unwrap();
        store.insert_route(&route("r2", "/a", Some("GET"), "c2")).await.unwrap();
        store.insert_route(&route("r3", "/a", None, "c1")).await.unwrap();

        let found = store
            .find_routes("/a", Some("GET"), &RouteScope::Consumer("c1".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "r1");

        let any = store.find_routes("/a", None, &RouteScope::Consumer("c1".into())).await.unwrap();
        assert_eq!(any.len(), 1);
        assert_eq!(any[0].id, "r3");
    }

    #[tokio::test]
    async fn test_update_missing_route_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_route(&route("nope", "/a", None, "c1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_package_links() {
        let store = MemoryStore::new();
        store
            .add_package_api(&PackageApi { package_id: "p1".into(), route_id: "r1".into() })
            .await
            .unwrap();
        store
            .add_package_api(&PackageApi { package_id: "p2".into(), route_id: "r1".into() })
            .await
            .unwrap();
        assert_eq!(store.packages_for_route("r1").await.unwrap(), vec!["p1", "p2"]);

        store.remove_route_from_packages("r1").await.unwrap();
        assert!(store.packages_for_route("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zone_lookups() {
        let store = MemoryStore::new();
        store
            .insert_package(&Package { id: "p1".into(), name: "orders".into(), zone_id: Some("z1".into()) })
            .await
            .unwrap();
        let mut zoned = route("r1", "/a", None, "c1");
        zoned.zone_id = Some("z2".into());
        store.insert_route(&zoned).await.unwrap();
        store.insert_route(&route("r2", "/b", None, "c1")).await.unwrap();

        assert_eq!(store.find_package_by_zone("z1").await.unwrap().unwrap().name, "orders");
        assert!(store.find_package_by_zone("z2").await.unwrap().is_none());
        let routes = store.list_routes_by_zone("z2").await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, "r1");
    }
}
