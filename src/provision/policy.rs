//! # Policy Reconciliation
//!
//! Computes the plugin changes needed to move a route from its persisted plugin
//! rows to a desired policy set, then applies them through a gateway adapter.
//!
//! ## Diff rules
//! - Plugins are keyed by name; the first desired entry for a name wins
//! - At most one `auth` policy is selected; later ones are skipped
//! - Rows from the `basic` category never take part in the diff
//! - `acl` follows auth: added with the consumer whitelist when auth turns on,
//!   removed when auth turns off
//! - `host-check` follows the route's network visibility and is never stored

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::RoutingConfig;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{NetVisibility, PluginInstance, Policy, PolicyCategory, Route, RuntimeService};
use crate::gateway::dto::PluginRequest;
use crate::gateway::{GatewayAdapter, GatewayVersion};
use crate::observability::CallTimer;
use crate::store::Store;

pub const ACL_PLUGIN: &str = "acl";
pub const HOST_CHECK_PLUGIN: &str = "host-check";
pub const PATH_VARIABLE_PLUGIN: &str = "path-variable";
pub const ROUTE_INFO_PLUGIN: &str = "set-route-info";
pub const OAUTH2_PLUGIN: &str = "oauth2";

/// A plugin the route should carry after reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredPolicy {
    pub name: String,
    pub config: Value,
    /// Catalog entry the plugin comes from; `None` for structural plugins
    pub policy: Option<Policy>,
}

impl DesiredPolicy {
    pub fn from_policy(policy: Policy) -> Self {
        Self {
            name: policy.plugin_name.clone(),
            config: policy.config.clone(),
            policy: Some(policy),
        }
    }

    pub fn structural<S: Into<String>>(name: S, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
            policy: None,
        }
    }

    pub fn policy_id(&self) -> Option<&str> {
        self.policy.as_ref().map(|p| p.id.as_str())
    }

    pub fn category(&self) -> Option<PolicyCategory> {
        self.policy.as_ref().map(|p| p.category)
    }
}

/// A persisted plugin row paired with the catalog entry it references
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentPlugin {
    pub instance: PluginInstance,
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDiff {
    pub adds: Vec<DesiredPolicy>,
    /// Desired state paired with the row it replaces
    pub updates: Vec<(DesiredPolicy, PluginInstance)>,
    pub deletes: Vec<PluginInstance>,
    pub need_auth: bool,
}

impl PolicyDiff {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    fn touches(&self, plugin: &str) -> bool {
        self.adds.iter().any(|p| p.name == plugin) || self.updates.iter().any(|(p, _)| p.name == plugin)
    }
}

/// Partition `desired` against `current` into adds, updates and deletes.
///
/// With `include_basic` every basic catalog policy is added as well, which is
/// what a freshly created route gets; otherwise only `acl` is drawn from
/// `basics`.
pub fn diff_policies(
    desired: &[DesiredPolicy],
    current: &[CurrentPlugin],
    basics: &[Policy],
    consumer_id: Option<&str>,
    include_basic: bool,
) -> PolicyDiff {
    let mut diff = PolicyDiff::default();

    let mut selected: Vec<&DesiredPolicy> = Vec::new();
    for policy in desired {
        if policy.category() == Some(PolicyCategory::Basic) {
            continue;
        }
        if selected.iter().any(|s| s.name == policy.name) {
            debug!(plugin = %policy.name, "duplicate desired plugin ignored");
            continue;
        }
        if policy.category() == Some(PolicyCategory::Auth) {
            if diff.need_auth {
                warn!(plugin = %policy.name, "route already has an auth policy, skipping");
                continue;
            }
            diff.need_auth = true;
        }
        selected.push(policy);
    }

    let mut acl_row: Option<&PluginInstance> = None;
    let mut remaining: Vec<&CurrentPlugin> = Vec::new();
    for row in current {
        match &row.policy {
            Some(policy) if policy.plugin_name == ACL_PLUGIN => acl_row = Some(&row.instance),
            Some(policy) if policy.category == PolicyCategory::Basic => {}
            _ => {
                if !remaining.iter().any(|r| r.instance.plugin_name == row.instance.plugin_name) {
                    remaining.push(row);
                }
            }
        }
    }

    for policy in selected {
        let Some(pos) = remaining.iter().position(|r| r.instance.plugin_name == policy.name) else {
            diff.adds.push(policy.clone());
            continue;
        };
        let row = remaining.remove(pos);
        let unchanged = match (policy.policy_id(), row.instance.policy_id.as_deref()) {
            (Some(wanted), Some(existing)) => wanted == existing,
            _ => false,
        };
        if !unchanged {
            diff.updates.push((policy.clone(), row.instance.clone()));
        }
    }
    diff.deletes.extend(remaining.into_iter().map(|r| r.instance.clone()));

    if let (Some(acl), false) = (acl_row, diff.need_auth) {
        diff.deletes.push(acl.clone());
    }

    for policy in basics {
        if policy.plugin_name == ACL_PLUGIN {
            match (diff.need_auth, acl_row, consumer_id) {
                (true, None, Some(consumer)) => {
                    let mut acl = DesiredPolicy::from_policy(policy.clone());
                    acl.config = with_whitelist(&policy.config, consumer);
                    diff.adds.push(acl);
                }
                (true, None, None) => warn!("auth enabled without a consumer, acl not attached"),
                _ => {}
            }
        } else if include_basic {
            diff.adds.push(DesiredPolicy::from_policy(policy.clone()));
        }
    }

    diff
}

fn with_whitelist(config: &Value, consumer_id: &str) -> Value {
    let mut config = match config {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    config["whitelist"] = Value::String(consumer_id.to_string());
    config
}

/// Backend and row identifiers plugins are attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTarget {
    pub route_row_id: String,
    pub service_row_id: String,
    pub backend_route_id: String,
    pub backend_service_id: String,
}

/// When plugin rows are written relative to their remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSync {
    /// Each row is written right after its remote call succeeds
    Immediate,
    /// Rows are written later through [`PolicyReconciler::persist`]
    Deferred,
}

/// A remote plugin change that went through, kept for rollback and persistence
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedChange {
    Added(PluginInstance),
    Updated {
        previous: PluginInstance,
        current: PluginInstance,
    },
    Removed(PluginInstance),
}

pub struct PolicyReconciler {
    store: Arc<dyn Store>,
    routing: RoutingConfig,
}

impl PolicyReconciler {
    pub fn new(store: Arc<dyn Store>, routing: RoutingConfig) -> Self {
        Self { store, routing }
    }

    /// Look up catalog policies by id. Unknown ids are logged and skipped.
    pub async fn resolve(&self, policy_ids: &[String]) -> ControlPlaneResult<Vec<DesiredPolicy>> {
        let mut desired = Vec::with_capacity(policy_ids.len());
        for id in policy_ids {
            match self.store.get_policy(id).await? {
                Some(policy) => desired.push(DesiredPolicy::from_policy(policy)),
                None => warn!(policy_id = %id, "policy not found in catalog"),
            }
        }
        Ok(desired)
    }

    /// Plugins implied by the route itself rather than requested by the caller
    pub fn structural(
        &self,
        route: &Route,
        backend_path: &str,
        rewrite_path: Option<&str>,
        runtime: Option<&RuntimeService>,
    ) -> Vec<DesiredPolicy> {
        let mut plugins = Vec::new();
        if let Some(rewrite) = rewrite_path.filter(|r| !r.is_empty()) {
            plugins.push(DesiredPolicy::structural(
                PATH_VARIABLE_PLUGIN,
                json!({
                    "RequestRegex": backend_path,
                    "RewritePath": rewrite,
                    "Carrier": "ROUTE",
                }),
            ));
        }
        if self.routing.has_route_info {
            let (app, service) = runtime
                .map(|r| (r.app_name.to_lowercase(), r.service_name.to_lowercase()))
                .unwrap_or_default();
            plugins.push(DesiredPolicy::structural(
                ROUTE_INFO_PLUGIN,
                json!({
                    "ProjectId": route.project_id,
                    "Workspace": route.env.to_lowercase(),
                    "App": app,
                    "Service": service,
                    "ApiPath": route.path,
                    "Carrier": "ROUTE",
                }),
            ));
        }
        plugins
    }

    /// Reject policies whose declared minimum version is newer than the backend
    pub async fn check_versions(&self, adapter: &dyn GatewayAdapter, desired: &[DesiredPolicy]) -> ControlPlaneResult<()> {
        let mut backend: Option<(String, Option<GatewayVersion>)> = None;
        for policy in desired {
            let Some(min_raw) = policy.policy.as_ref().and_then(|p| p.min_gateway_version.as_deref()) else {
                continue;
            };
            let Some(min) = GatewayVersion::parse(min_raw) else {
                warn!(plugin = %policy.name, min_version = min_raw, "unparsable minimum gateway version ignored");
                continue;
            };
            if backend.is_none() {
                let raw = adapter.get_version().await?;
                let parsed = GatewayVersion::parse(&raw);
                backend = Some((raw, parsed));
            }
            if let Some((raw, Some(version))) = &backend {
                if *version < min {
                    return Err(ControlPlaneError::BackendVersionUnsupported {
                        plugin: policy.name.clone(),
                        version: raw.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Persisted plugin rows of a route with their catalog entries
    pub async fn current(&self, route_row_id: &str) -> ControlPlaneResult<Vec<CurrentPlugin>> {
        let rows = self.store.list_plugins_by_route(route_row_id).await?;
        let mut current = Vec::with_capacity(rows.len());
        for instance in rows {
            let policy = match instance.policy_id.as_deref() {
                Some(id) => match self.store.get_policy(id).await? {
                    Some(policy) => Some(policy),
                    None => {
                        warn!(plugin = %instance.plugin_name, policy_id = id, "plugin references a missing policy");
                        continue;
                    }
                },
                None => None,
            };
            current.push(CurrentPlugin { instance, policy });
        }
        Ok(current)
    }

    pub async fn plan(
        &self,
        desired: &[DesiredPolicy],
        route_row_id: &str,
        consumer_id: Option<&str>,
        include_basic: bool,
    ) -> ControlPlaneResult<PolicyDiff> {
        let current = if include_basic {
            Vec::new()
        } else {
            self.current(route_row_id).await?
        };
        let basics = self.store.list_policies_by_category(PolicyCategory::Basic).await?;
        Ok(diff_policies(desired, &current, &basics, consumer_id, include_basic))
    }

    /// Apply `diff` in add, update, delete order.
    ///
    /// Every change that reached the backend is pushed to `changes` before the
    /// next one starts, so a caller can undo a partial application.
    #[instrument(skip_all, fields(route_id = %target.route_row_id))]
    pub async fn apply(
        &self,
        adapter: &dyn GatewayAdapter,
        target: &PluginTarget,
        diff: &PolicyDiff,
        sync: RowSync,
        changes: &mut Vec<AppliedChange>,
    ) -> ControlPlaneResult<()> {
        let timer = CallTimer::start("apply plugins");

        if diff.touches(OAUTH2_PLUGIN) {
            if let Err(e) = adapter.touch_route_oauth_method(&target.backend_route_id).await {
                warn!(error = %e, "failed to open oauth2 methods on route");
            }
        }

        for policy in &diff.adds {
            let req = PluginRequest::new(policy.name.clone(), policy.config.clone()).on_route(target.backend_route_id.clone());
            let resp = adapter
                .add_plugin(&req)
                .await
                .map_err(|e| plugin_failure(&policy.name, e))?;
            let Some(resp) = resp else {
                continue;
            };
            let instance = PluginInstance {
                id: Uuid::new_v4().to_string(),
                plugin_name: policy.name.clone(),
                backend_id: resp.id,
                route_id: Some(target.route_row_id.clone()),
                service_id: Some(target.service_row_id.clone()),
                consumer_id: None,
                config: policy.config.clone(),
                policy_id: policy.policy_id().map(str::to_string),
                enabled: resp.enabled,
            };
            changes.push(AppliedChange::Added(instance.clone()));
            if sync == RowSync::Immediate {
                self.store.insert_plugin(&instance).await?;
            }
        }

        for (policy, previous) in &diff.updates {
            let req = PluginRequest::new(policy.name.clone(), policy.config.clone())
                .with_id(previous.backend_id.clone())
                .on_route(target.backend_route_id.clone());
            let resp = adapter
                .update_plugin(&req)
                .await
                .map_err(|e| plugin_failure(&policy.name, e))?;
            let Some(resp) = resp else {
                continue;
            };
            let current = PluginInstance {
                backend_id: resp.id,
                config: policy.config.clone(),
                policy_id: policy.policy_id().map(str::to_string),
                enabled: resp.enabled,
                ..previous.clone()
            };
            changes.push(AppliedChange::Updated {
                previous: previous.clone(),
                current: current.clone(),
            });
            if sync == RowSync::Immediate {
                self.store.update_plugin(&current).await?;
            }
        }

        for row in &diff.deletes {
            match adapter.remove_plugin(&row.backend_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!(plugin = %row.plugin_name, "plugin already gone"),
                Err(e) => return Err(plugin_failure(&row.plugin_name, e)),
            }
            changes.push(AppliedChange::Removed(row.clone()));
            if sync == RowSync::Immediate {
                self.store.delete_plugin(&row.id).await?;
            }
        }

        let ms = timer.finish();
        info!(
            adds = diff.adds.len(),
            updates = diff.updates.len(),
            deletes = diff.deletes.len(),
            "plugins applied in {}ms",
            ms
        );
        Ok(())
    }

    /// Attach or drop the `host-check` plugin according to `visibility`
    pub async fn sync_visibility(
        &self,
        adapter: &dyn GatewayAdapter,
        backend_route_id: &str,
        visibility: NetVisibility,
    ) -> ControlPlaneResult<()> {
        if !adapter.capabilities().host_check {
            return Ok(());
        }
        let req = PluginRequest::new(HOST_CHECK_PLUGIN, json!({ "allow_host": self.routing.inner_hosts_allow }))
            .on_route(backend_route_id.to_string());
        let result = match visibility {
            NetVisibility::Inner => adapter.create_or_update_plugin(&req).await.map(|_| ()),
            NetVisibility::Outer => adapter.delete_plugin_if_exist(&req).await,
        };
        result.map_err(|e| plugin_failure(HOST_CHECK_PLUGIN, e))
    }

    /// Write rows for changes applied with [`RowSync::Deferred`]
    pub async fn persist(&self, changes: &[AppliedChange]) -> ControlPlaneResult<()> {
        for change in changes {
            match change {
                AppliedChange::Added(instance) => self.store.insert_plugin(instance).await?,
                AppliedChange::Updated { current, .. } => self.store.update_plugin(current).await?,
                AppliedChange::Removed(instance) => self.store.delete_plugin(&instance.id).await?,
            }
        }
        Ok(())
    }

    /// Plan and apply the desired policies for a route, then sync host-check.
    ///
    /// Versions are not checked here; callers run [`Self::check_versions`]
    /// before their first remote write. Returns whether the route ends up
    /// requiring auth.
    #[allow(clippy::too_many_arguments)]
    pub async fn reconcile(
        &self,
        adapter: &dyn GatewayAdapter,
        target: &PluginTarget,
        desired: &[DesiredPolicy],
        consumer_id: Option<&str>,
        visibility: NetVisibility,
        include_basic: bool,
        sync: RowSync,
        changes: &mut Vec<AppliedChange>,
    ) -> ControlPlaneResult<bool> {
        let diff = self.plan(desired, &target.route_row_id, consumer_id, include_basic).await?;
        self.apply(adapter, target, &diff, sync, changes).await?;
        self.sync_visibility(adapter, &target.backend_route_id, visibility).await?;
        Ok(diff.need_auth)
    }
}

fn plugin_failure(plugin: &str, error: ControlPlaneError) -> ControlPlaneError {
    error.classify(|message| ControlPlaneError::PluginApplyFailed {
        plugin: plugin.to_string(),
        message,
    })
}
