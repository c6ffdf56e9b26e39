//! # Route Provisioning
//!
//! Create, update and delete of published APIs. Each call runs the fixed
//! sequence service → route → plugins → rows against one gateway adapter and
//! the store. Create rolls back through [`Compensation`] on failure; update
//! marks the row `failed` and leaves what was applied in place.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::config::{ClusterConfig, RoutingConfig};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{
    ApiRequest, PolicyCategory, Route, RouteScope, RouteState, RouteTarget, RuntimeService, Service,
};
use crate::gateway::dto::{RouteRequest, ServiceRequest, ServiceResponse};
use crate::gateway::{AdapterRegistry, GatewayAdapter};
use crate::observability::CallTimer;
use crate::provision::compensation::{Compensation, UndoStep};
use crate::provision::consumer::ConsumerProvisioner;
use crate::provision::policy::{DesiredPolicy, PluginTarget, PolicyReconciler, RowSync};
use crate::provision::tolerate_not_found;
use crate::routing::template::{align, join_redirect, PathAlignment, PathTemplate};
use crate::store::Store;

/// Redirect address and optional runtime binding behind a request
#[derive(Debug, Clone)]
struct ResolvedTarget {
    address: String,
    runtime: Option<RuntimeService>,
}

pub struct RouteProvisioner {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn Store>,
    reconciler: Arc<PolicyReconciler>,
    consumers: Arc<ConsumerProvisioner>,
    routing: RoutingConfig,
}

impl RouteProvisioner {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        store: Arc<dyn Store>,
        reconciler: Arc<PolicyReconciler>,
        consumers: Arc<ConsumerProvisioner>,
        routing: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            reconciler,
            consumers,
            routing,
        }
    }

    pub async fn get(&self, route_id: &str) -> ControlPlaneResult<Route> {
        self.store
            .get_route(route_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("route", route_id))
    }

    pub async fn list_by_scope(&self, scope: &RouteScope) -> ControlPlaneResult<Vec<Route>> {
        self.store.list_routes_by_scope(scope).await
    }

    /// Publish a new API and return its persisted row
    #[instrument(skip_all, fields(cluster = %req.cluster_name, path = %req.path))]
    pub async fn create(&self, req: ApiRequest) -> ControlPlaneResult<Route> {
        let timer = CallTimer::start("create route");
        let method = normalize_method(req.method.as_deref());
        let target = self
            .resolve_target(&req.target, req.scope.runtime_service_id())
            .await?;
        let cluster = self.registry.cluster(&req.cluster_name)?.clone();
        let hosts = self.effective_hosts(&req.hosts, &cluster);
        let alignment = align(&req.path, &target.address)?;

        if let Some(existing_id) = self
            .find_conflict(&req.scope, &alignment.route_path, method.as_deref(), &hosts, None)
            .await?
        {
            return Err(ControlPlaneError::RouteConflict {
                path: alignment.route_path,
                method: method.unwrap_or_else(|| "*".to_string()),
                existing_id,
            });
        }

        let adapter = self.registry.adapter_for(&req.cluster_name)?;
        let now = Utc::now();
        let mut route = Route {
            id: Uuid::new_v4().to_string(),
            cluster_name: req.cluster_name.clone(),
            org_id: req.org_id.clone(),
            project_id: req.project_id.clone(),
            env: req.env.clone(),
            path: alignment.route_path.clone(),
            method,
            hosts,
            target_address: alignment.stored_address.clone(),
            target_rewrite_path: alignment.rewrite_path.clone().unwrap_or_default(),
            regex_path: alignment.regex_path,
            need_auth: false,
            net_visibility: req.net_visibility,
            consumer_id: req.scope.consumer_id().map(str::to_string),
            runtime_service_id: req.scope.runtime_service_id().map(str::to_string),
            upstream_api_id: req.upstream_api_id.clone(),
            policies: req.policies.clone(),
            backend_route_id: None,
            service_id: None,
            zone_id: req.zone_id.clone(),
            state: RouteState::Provisioning,
            created_at: now,
            updated_at: now,
        };

        let mut desired = self.reconciler.resolve(&req.policies).await?;
        desired.extend(self.reconciler.structural(
            &route,
            &alignment.backend_path,
            alignment.rewrite_path.as_deref(),
            target.runtime.as_ref(),
        ));
        self.reconciler.check_versions(adapter.as_ref(), &desired).await?;
        let acl_consumer = self.acl_consumer(&route, &desired).await?;

        let mut compensation = Compensation::new(adapter.clone(), self.store.clone());
        let result = self
            .provision(
                adapter.as_ref(),
                &mut route,
                &alignment,
                &desired,
                acl_consumer.as_deref(),
                &mut compensation,
            )
            .await;

        match result {
            Ok(()) => {
                compensation.commit();
                let ms = timer.finish();
                info!(route_id = %route.id, state = %route.state, "route created in {}ms", ms);
                Ok(route)
            }
            Err(e) => {
                warn!(error = %e, "route create failed, rolling back");
                compensation.unwind().await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        adapter: &dyn GatewayAdapter,
        route: &mut Route,
        alignment: &PathAlignment,
        desired: &[DesiredPolicy],
        acl_consumer: Option<&str>,
        compensation: &mut Compensation,
    ) -> ControlPlaneResult<()> {
        let service_req = ServiceRequest::from_address(None, &alignment.service_address)?;
        let service_resp = adapter
            .create_or_update_service(&service_req)
            .await
            .map_err(service_failure)?;
        compensation.record(UndoStep::RemoteService(service_resp.id.clone()));

        let route_req = build_route_request(route, alignment, &service_resp.id, None)?;
        let route_resp = adapter
            .create_or_update_route(&route_req)
            .await
            .map_err(route_failure)?;
        compensation.record(UndoStep::RemoteRoute(route_resp.id.clone()));

        let service = service_row(Uuid::new_v4().to_string(), &route.id, &service_req, &service_resp);
        let target = PluginTarget {
            route_row_id: route.id.clone(),
            service_row_id: service.id.clone(),
            backend_route_id: route_resp.id.clone(),
            backend_service_id: service_resp.id.clone(),
        };

        let mut changes = Vec::new();
        let applied = self
            .reconciler
            .reconcile(
                adapter,
                &target,
                desired,
                acl_consumer,
                route.net_visibility,
                true,
                RowSync::Deferred,
                &mut changes,
            )
            .await;
        compensation.record_plugins(&changes);
        route.need_auth = applied?;

        route.backend_route_id = Some(route_resp.id);
        route.service_id = Some(service.id.clone());
        route.state = RouteState::Active;
        route.updated_at = Utc::now();

        compensation.record(UndoStep::RouteRow(route.id.clone()));
        self.store.insert_route(route).await?;
        compensation.record(UndoStep::ServiceRow(service.id.clone()));
        self.store.insert_service(&service).await?;
        compensation.record_plugin_rows(&changes);
        self.reconciler.persist(&changes).await?;
        Ok(())
    }

    /// Re-publish an existing API.
    ///
    /// Path, method and hosts are re-checked only when they change. A route
    /// bound to an upstream API keeps its method whatever the request says.
    #[instrument(skip_all, fields(route_id = %route_id))]
    pub async fn update(&self, route_id: &str, req: ApiRequest) -> ControlPlaneResult<Route> {
        let timer = CallTimer::start("update route");
        let mut route = self.get(route_id).await?;

        let mut method = normalize_method(req.method.as_deref());
        if route.upstream_api_id.is_some() && method != route.method {
            warn!(
                requested = method.as_deref().unwrap_or("*"),
                pinned = route.method_label(),
                "method of an upstream-bound route is immutable, keeping the original"
            );
            method = route.method.clone();
        }

        let target = self
            .resolve_target(&req.target, route.runtime_service_id.as_deref())
            .await?;
        let cluster = self.registry.cluster(&route.cluster_name)?.clone();
        let hosts = self.effective_hosts(&req.hosts, &cluster);
        let alignment = align(&req.path, &target.address)?;

        let new_hosts: BTreeSet<&str> = hosts.iter().map(String::as_str).collect();
        let route_changed =
            alignment.route_path != route.path || method != route.method || new_hosts != route.host_set();
        let service_changed = alignment.stored_address != route.target_address;

        if route_changed {
            if let Some(scope) = route.scope() {
                if let Some(existing_id) = self
                    .find_conflict(&scope, &alignment.route_path, method.as_deref(), &hosts, Some(&route.id))
                    .await?
                {
                    return Err(ControlPlaneError::RouteConflict {
                        path: alignment.route_path,
                        method: method.unwrap_or_else(|| "*".to_string()),
                        existing_id,
                    });
                }
            }
        }

        let adapter = self.registry.adapter_for(&route.cluster_name)?;
        let previous = route.clone();
        route.path = alignment.route_path.clone();
        route.method = method;
        route.hosts = hosts;
        route.target_address = alignment.stored_address.clone();
        route.target_rewrite_path = alignment.rewrite_path.clone().unwrap_or_default();
        route.regex_path = alignment.regex_path;
        route.net_visibility = req.net_visibility;
        route.policies = req.policies.clone();
        if req.zone_id.is_some() {
            route.zone_id = req.zone_id.clone();
        }

        let mut desired = self.reconciler.resolve(&req.policies).await?;
        desired.extend(self.reconciler.structural(
            &route,
            &alignment.backend_path,
            alignment.rewrite_path.as_deref(),
            target.runtime.as_ref(),
        ));
        self.reconciler.check_versions(adapter.as_ref(), &desired).await?;
        let acl_consumer = self.acl_consumer(&route, &desired).await?;

        let mut marker = previous.clone();
        marker.state = RouteState::Updating;
        self.store.update_route(&marker).await?;

        let result = self
            .republish(
                adapter.as_ref(),
                &mut route,
                &alignment,
                &desired,
                acl_consumer.as_deref(),
                route_changed,
                service_changed,
            )
            .await;

        match result {
            Ok(()) => {
                route.state = RouteState::Active;
                route.updated_at = Utc::now();
                self.store.update_route(&route).await?;
                let ms = timer.finish();
                info!(route_changed, service_changed, "route updated in {}ms", ms);
                Ok(route)
            }
            Err(e) => {
                let mut failed = previous;
                failed.state = RouteState::Failed;
                failed.updated_at = Utc::now();
                if let Err(store_err) = self.store.update_route(&failed).await {
                    warn!(error = %store_err, "failed to mark route as failed");
                }
                Err(e)
            }
        }
    }

    async fn republish(
        &self,
        adapter: &dyn GatewayAdapter,
        route: &mut Route,
        alignment: &PathAlignment,
        desired: &[DesiredPolicy],
        acl_consumer: Option<&str>,
        route_changed: bool,
        service_changed: bool,
    ) -> ControlPlaneResult<()> {
        let existing_service = self.store.get_service_by_route(&route.id).await?;

        let service = match existing_service {
            Some(current) if !service_changed => current,
            current => {
                let backend_id = current.as_ref().map(|s| s.backend_id.clone());
                let row_id = current
                    .as_ref()
                    .map(|s| s.id.clone())
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let req = ServiceRequest::from_address(backend_id, &alignment.service_address)?;
                let resp = adapter.create_or_update_service(&req).await.map_err(service_failure)?;
                let service = service_row(row_id, &route.id, &req, &resp);
                if current.is_some() {
                    self.store.update_service(&service).await?;
                } else {
                    self.store.insert_service(&service).await?;
                }
                service
            }
        };

        let backend_route_id = match (&route.backend_route_id, route_changed || service_changed) {
            (Some(id), false) => id.clone(),
            (existing, _) => {
                let req = build_route_request(route, alignment, &service.backend_id, existing.clone())?;
                let resp = adapter.create_or_update_route(&req).await.map_err(route_failure)?;
                resp.id
            }
        };
        route.backend_route_id = Some(backend_route_id.clone());
        route.service_id = Some(service.id.clone());

        let target = PluginTarget {
            route_row_id: route.id.clone(),
            service_row_id: service.id.clone(),
            backend_route_id,
            backend_service_id: service.backend_id.clone(),
        };
        let mut changes = Vec::new();
        route.need_auth = self
            .reconciler
            .reconcile(
                adapter,
                &target,
                desired,
                acl_consumer,
                route.net_visibility,
                false,
                RowSync::Immediate,
                &mut changes,
            )
            .await?;
        Ok(())
    }

    /// Unpublish an API and remove its rows.
    ///
    /// A runtime-bound route that is still part of a package is refused before
    /// any remote call.
    #[instrument(skip_all, fields(route_id = %route_id))]
    pub async fn delete(&self, route_id: &str) -> ControlPlaneResult<()> {
        let route = self.get(route_id).await?;
        let packages = self.store.packages_for_route(route_id).await?;
        if !packages.is_empty() && route.runtime_service_id.is_some() {
            return Err(ControlPlaneError::RouteInUse {
                route_id: route_id.to_string(),
                packages,
            });
        }

        let adapter = self.registry.adapter_for(&route.cluster_name)?;
        let mut deleting = route.clone();
        deleting.state = RouteState::Deleting;
        self.store.update_route(&deleting).await?;

        self.store.remove_route_from_packages(route_id).await?;

        let plugins = self.store.list_plugins_by_route(route_id).await?;
        for plugin in &plugins {
            tolerate_not_found(adapter.remove_plugin(&plugin.backend_id).await)?;
        }
        if let Some(backend_route_id) = &route.backend_route_id {
            tolerate_not_found(adapter.delete_route(backend_route_id).await)?;
        }
        let service = self.store.get_service_by_route(route_id).await?;
        if let Some(service) = &service {
            tolerate_not_found(adapter.delete_service(&service.backend_id).await)?;
        }

        for plugin in &plugins {
            self.store.delete_plugin(&plugin.id).await?;
        }
        if let Some(service) = &service {
            self.store.delete_service(&service.id).await?;
        }
        self.store.delete_route(route_id).await?;
        info!(plugins = plugins.len(), "route deleted");
        Ok(())
    }

    /// Consumer the ACL whitelist names. Runtime-scoped routes with an auth
    /// policy fall back to the environment's default consumer.
    async fn acl_consumer(&self, route: &Route, desired: &[DesiredPolicy]) -> ControlPlaneResult<Option<String>> {
        if let Some(id) = &route.consumer_id {
            return Ok(Some(id.clone()));
        }
        if !desired.iter().any(|p| p.category() == Some(PolicyCategory::Auth)) {
            return Ok(None);
        }
        let consumer = self
            .consumers
            .ensure_default(&route.cluster_name, &route.org_id, &route.project_id, &route.env)
            .await?;
        Ok(Some(consumer.id))
    }

    /// Redirect address of `target`. A route scoped to a runtime service must
    /// name that same service.
    async fn resolve_target(
        &self,
        target: &RouteTarget,
        runtime_scope: Option<&str>,
    ) -> ControlPlaneResult<ResolvedTarget> {
        match target {
            RouteTarget::Address { address, path } => {
                if runtime_scope.is_some() {
                    return Err(ControlPlaneError::invalid_request(
                        "target",
                        "runtime-scoped routes must name an app and service",
                    ));
                }
                if address.trim().is_empty() {
                    return Err(ControlPlaneError::invalid_request("redirect_address", "is required"));
                }
                Ok(ResolvedTarget {
                    address: join_redirect(address.trim(), path),
                    runtime: None,
                })
            }
            RouteTarget::Runtime {
                runtime_id,
                app,
                service,
                path,
            } => {
                for (field, value) in [("runtime_id", runtime_id), ("app", app), ("service", service)] {
                    if value.trim().is_empty() {
                        return Err(ControlPlaneError::invalid_request(field, "is required for runtime targets"));
                    }
                }
                let runtime = self
                    .store
                    .find_runtime_service(runtime_id, app, service)
                    .await?
                    .ok_or_else(|| {
                        ControlPlaneError::not_found("runtime service", format!("{}/{}/{}", runtime_id, app, service))
                    })?;
                if let Some(scope_id) = runtime_scope {
                    if scope_id != runtime.id {
                        return Err(ControlPlaneError::invalid_request(
                            "target",
                            format!("runtime service {} does not match route scope {}", runtime.id, scope_id),
                        ));
                    }
                }
                Ok(ResolvedTarget {
                    address: join_redirect(&runtime.inner_address(), path),
                    runtime: Some(runtime),
                })
            }
        }
    }

    fn effective_hosts(&self, requested: &[String], cluster: &ClusterConfig) -> Vec<String> {
        let source: Vec<&str> = if requested.is_empty() {
            [self.routing.inner_host.as_str(), cluster.outer_endpoint.as_str()].to_vec()
        } else {
            requested.iter().map(String::as_str).collect()
        };
        let mut hosts: Vec<String> = Vec::with_capacity(source.len());
        for host in source.into_iter().map(str::trim).filter(|h| !h.is_empty()) {
            if !hosts.iter().any(|h| h == host) {
                hosts.push(host.to_string());
            }
        }
        hosts
    }

    /// Id of a route in `scope` that already serves this path and method on
    /// an overlapping host set. A route with no hosts overlaps everything.
    async fn find_conflict(
        &self,
        scope: &RouteScope,
        path: &str,
        method: Option<&str>,
        hosts: &[String],
        exclude: Option<&str>,
    ) -> ControlPlaneResult<Option<String>> {
        let candidates = self.store.find_routes(path, method, scope).await?;
        let wanted: BTreeSet<&str> = hosts.iter().map(String::as_str).collect();
        Ok(candidates
            .into_iter()
            .filter(|r| Some(r.id.as_str()) != exclude)
            .find(|r| r.path == path && (r.hosts.is_empty() || !r.host_set().is_disjoint(&wanted)))
            .map(|r| r.id))
    }
}

fn normalize_method(method: Option<&str>) -> Option<String> {
    method
        .map(str::trim)
        .filter(|m| !m.is_empty() && *m != "*")
        .map(str::to_uppercase)
}

fn build_route_request(
    route: &Route,
    alignment: &PathAlignment,
    backend_service_id: &str,
    backend_route_id: Option<String>,
) -> ControlPlaneResult<RouteRequest> {
    let template = PathTemplate::split(&alignment.route_path)?;
    let mut req = RouteRequest::new(
        backend_service_id,
        alignment.backend_path.clone(),
        route.hosts.clone(),
        route.method.as_deref(),
    )
    .with_regex_priority(&template);
    req.id = backend_route_id;
    if let Some(upstream) = &route.upstream_api_id {
        req.add_tag("upstream_api_id", upstream);
    }
    Ok(req)
}

fn service_row(id: String, route_id: &str, req: &ServiceRequest, resp: &ServiceResponse) -> Service {
    Service {
        id,
        route_id: route_id.to_string(),
        backend_id: resp.id.clone(),
        protocol: req.protocol.clone(),
        host: req.host.clone(),
        port: req.port,
        path_prefix: req.path.clone().unwrap_or_default(),
        connect_timeout_ms: req.connect_timeout,
        read_timeout_ms: req.read_timeout,
        write_timeout_ms: req.write_timeout,
        retries: req.retries,
    }
}

fn service_failure(error: ControlPlaneError) -> ControlPlaneError {
    error.classify(|message| ControlPlaneError::ServiceProvisionFailed { message })
}

fn route_failure(error: ControlPlaneError) -> ControlPlaneError {
    error.classify(|message| ControlPlaneError::RoutePublishFailed { message })
}
