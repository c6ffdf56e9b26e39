//! # Route Provisioning Tests
//!
//! Drives create/update/delete of published APIs against the recording
//! adapter and checks both the remote calls and the persisted rows.

mod common;

use common::*;
use gateway_control_plane::core::types::{
    ApiRequest, NetVisibility, PackageApi, Policy, PolicyCategory, RouteScope, RouteState, RouteTarget,
    RuntimeService,
};
use gateway_control_plane::provision::NewConsumer;
use gateway_control_plane::store::*;
use gateway_control_plane::ControlPlaneError;

async fn insert_orders_runtime(h: &Harness) {
    h.store
        .insert_runtime_service(&RuntimeService {
            id: "rs1".into(),
            runtime_id: "rt1".into(),
            app_name: "shop".into(),
            service_name: "orders".into(),
            group_name: String::new(),
            project_namespace: "project-7-test".into(),
            cluster_name: CLUSTER.into(),
            port: 8080,
        })
        .await
        .unwrap();
}

fn runtime_request(path: &str, scope_id: &str) -> ApiRequest {
    let mut req = address_request(path, None, "unused", "unused");
    req.scope = RouteScope::RuntimeService(scope_id.into());
    req.target = RouteTarget::Runtime {
        runtime_id: "rt1".into(),
        app: "shop".into(),
        service: "orders".into(),
        path: String::new(),
    };
    req
}

#[tokio::test]
async fn test_create_regex_route_with_auth() {
    let h = harness().await;
    let mut req = address_request("/orders/{id}", Some("get"), "http://orders:8080/orders/{id}", "c1");
    req.policies = vec!["key-auth".into(), "rate".into()];

    let route = h.control_plane.routes().create(req).await.unwrap();

    assert_eq!(route.state, RouteState::Active);
    assert_eq!(route.path, "/orders/{id}");
    assert_eq!(route.method.as_deref(), Some("GET"));
    assert!(route.regex_path);
    assert!(route.need_auth);
    assert_eq!(route.hosts, vec!["gateway.inner".to_string(), "api.example.com".to_string()]);
    assert_eq!(route.target_rewrite_path, "/orders/{id}");

    assert_eq!(
        h.adapter.calls_starting_with("create_or_update_route"),
        vec!["create_or_update_route /orders/(?<id>[^/]+)".to_string()]
    );
    assert_eq!(
        h.adapter.calls_starting_with("add_plugin"),
        vec![
            "add_plugin key-auth".to_string(),
            "add_plugin rate-limiting".to_string(),
            "add_plugin path-variable".to_string(),
            "add_plugin acl".to_string(),
        ]
    );
    assert_eq!(
        h.adapter.calls_starting_with("delete_plugin_if_exist"),
        vec!["delete_plugin_if_exist host-check".to_string()]
    );

    let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
    assert_eq!(plugins.len(), 4);
    let acl = plugins.iter().find(|p| p.plugin_name == "acl").unwrap();
    assert_eq!(acl.config["whitelist"], "c1");
    let rewrite = plugins.iter().find(|p| p.plugin_name == "path-variable").unwrap();
    assert_eq!(rewrite.config["RequestRegex"], "/orders/(?<id>[^/]+)");
    assert!(rewrite.policy_id.is_none());

    let service = h.store.get_service_by_route(&route.id).await.unwrap().unwrap();
    assert_eq!(service.host, "orders");
    assert_eq!(service.port, 8080);
    assert_eq!(route.service_id.as_deref(), Some(service.id.as_str()));
}

#[tokio::test]
async fn test_inner_route_gets_host_check() {
    let h = harness().await;
    let mut req = address_request("/internal", None, "http://svc:8080", "c1");
    req.net_visibility = NetVisibility::Inner;

    let route = h.control_plane.routes().create(req).await.unwrap();

    assert!(route.method.is_none());
    assert!(!route.need_auth);
    assert_eq!(
        h.adapter.calls_starting_with("create_or_update_plugin"),
        vec!["create_or_update_plugin host-check".to_string()]
    );
    // host-check is never persisted
    assert_eq!(h.store.plugin_count(), 0);
}

#[tokio::test]
async fn test_conflict_on_overlapping_hosts() {
    let h = harness().await;
    let mut first = address_request("/health", Some("GET"), "http://svc:8080", "c1");
    first.hosts = vec!["a.example.com".into(), "b.example.com".into()];
    let existing = h.control_plane.routes().create(first).await.unwrap();
    h.adapter.clear_calls();

    let mut second = address_request("/health", Some("get"), "http://other:8080", "c1");
    second.hosts = vec!["b.example.com".into(), "c.example.com".into()];
    let err = h.control_plane.routes().create(second).await.unwrap_err();

    match err {
        ControlPlaneError::RouteConflict { existing_id, method, .. } => {
            assert_eq!(existing_id, existing.id);
            assert_eq!(method, "GET");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(h.adapter.calls().is_empty());
    assert_eq!(h.store.route_count(), 1);
}

#[tokio::test]
async fn test_no_conflict_across_methods_hosts_or_scopes() {
    let h = harness().await;
    let routes = h.control_plane.routes();
    let mut base = address_request("/health", Some("GET"), "http://svc:8080", "c1");
    base.hosts = vec!["a.example.com".into()];
    routes.create(base.clone()).await.unwrap();

    let mut other_method = base.clone();
    other_method.method = Some("POST".into());
    routes.create(other_method).await.unwrap();

    let mut disjoint_hosts = base.clone();
    disjoint_hosts.hosts = vec!["z.example.com".into()];
    routes.create(disjoint_hosts).await.unwrap();

    let mut other_consumer = base.clone();
    other_consumer.scope = RouteScope::Consumer("c2".into());
    routes.create(other_consumer).await.unwrap();

    assert_eq!(h.store.route_count(), 4);
    assert_eq!(routes.list_by_scope(&RouteScope::Consumer("c1".into())).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_path_fails_before_remote_calls() {
    let h = harness().await;
    let req = address_request("/orders/{id", None, "http://svc:8080", "c1");

    let err = h.control_plane.routes().create(req).await.unwrap_err();

    assert!(matches!(err, ControlPlaneError::MalformedPathTemplate { .. }));
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_unbound_rewrite_variable_is_rejected() {
    let h = harness().await;
    let req = address_request("/orders/{id}", None, "http://svc:8080/v1/{other}", "c1");

    let err = h.control_plane.routes().create(req).await.unwrap_err();

    assert!(matches!(err, ControlPlaneError::UnboundRewriteVariable { .. }));
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_missing_redirect_address() {
    let h = harness().await;
    let req = address_request("/a", None, "  ", "c1");

    let err = h.control_plane.routes().create(req).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_route_failure_rolls_back_service() {
    let h = harness().await;
    h.adapter.fail("create_or_update_route");

    let err = h
        .control_plane
        .routes()
        .create(address_request("/orders", None, "http://orders:8080", "c1"))
        .await
        .unwrap_err();

    assert_eq!(err.error_type(), "route_publish_failed");
    assert_eq!(
        h.adapter.calls(),
        vec![
            "create_or_update_service orders:8080".to_string(),
            "create_or_update_route /orders".to_string(),
            "delete_service svc-1".to_string(),
        ]
    );
    assert_eq!(h.store.route_count(), 0);
}

#[tokio::test]
async fn test_plugin_failure_rolls_back_service_before_route() {
    let h = harness().await;
    h.adapter.fail("add_plugin:cors");
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    req.policies = vec!["rate".into(), "cors".into()];

    let err = h.control_plane.routes().create(req).await.unwrap_err();

    match err {
        ControlPlaneError::PluginApplyFailed { plugin, .. } => assert_eq!(plugin, "cors"),
        other => panic!("unexpected error {:?}", other),
    }
    let calls = h.adapter.calls();
    let undo: Vec<&String> = calls.iter().skip_while(|c| !c.starts_with("add_plugin cors")).skip(1).collect();
    assert_eq!(
        undo,
        vec![
            &"remove_plugin plugin-3".to_string(),
            &"delete_service svc-1".to_string(),
            &"delete_route route-2".to_string(),
        ]
    );
    assert_eq!(h.store.route_count(), 0);
    assert_eq!(h.store.service_count(), 0);
    assert_eq!(h.store.plugin_count(), 0);
}

#[tokio::test]
async fn test_disabled_plugin_is_skipped() {
    let h = harness().await;
    h.adapter.disable_plugin("rate-limiting");
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    req.policies = vec!["rate".into(), "cors".into()];

    let route = h.control_plane.routes().create(req).await.unwrap();

    let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
    let names: Vec<&str> = plugins.iter().map(|p| p.plugin_name.as_str()).collect();
    assert_eq!(names, vec!["cors"]);
}

#[tokio::test]
async fn test_version_gate_blocks_before_remote_writes() {
    let mut config = test_config();
    config.policies.push(Policy {
        min_gateway_version: Some("3.0.0".into()),
        ..policy("new-plugin", "fancy-plugin", PolicyCategory::TrafficControl)
    });
    let h = harness_with(config, FakeAdapter::new()).await;
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    req.policies = vec!["new-plugin".into()];

    let err = h.control_plane.routes().create(req).await.unwrap_err();

    match err {
        ControlPlaneError::BackendVersionUnsupported { plugin, version } => {
            assert_eq!(plugin, "fancy-plugin");
            assert_eq!(version, "2.8.1");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.adapter.calls(), vec!["get_version ".to_string()]);
}

#[tokio::test]
async fn test_runtime_target_resolves_inner_address() {
    let h = harness().await;
    insert_orders_runtime(&h).await;
    let mut req = runtime_request("/orders", "rs1");
    req.target = RouteTarget::Runtime {
        runtime_id: "rt1".into(),
        app: "shop".into(),
        service: "orders".into(),
        path: "/api/orders".into(),
    };

    let route = h.control_plane.routes().create(req.clone()).await.unwrap();
    assert_eq!(
        route.target_address,
        "http://orders.project-7-test.svc.cluster.local:8080/api/orders"
    );
    assert_eq!(route.runtime_service_id.as_deref(), Some("rs1"));

    req.target = RouteTarget::Runtime {
        runtime_id: "rt1".into(),
        app: "shop".into(),
        service: "missing".into(),
        path: String::new(),
    };
    req.path = "/other".into();
    let err = h.control_plane.routes().create(req).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_runtime_scope_must_match_target() {
    let h = harness().await;
    insert_orders_runtime(&h).await;

    let mut with_address = runtime_request("/orders", "rs1");
    with_address.target = RouteTarget::Address {
        address: "http://orders:8080".into(),
        path: String::new(),
    };
    let err = h.control_plane.routes().create(with_address).await.unwrap_err();
    assert!(err.is_validation());

    let err = h
        .control_plane
        .routes()
        .create(runtime_request("/orders", "rs-other"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert!(h.adapter.calls().is_empty());
    assert_eq!(h.store.route_count(), 0);
}

#[tokio::test]
async fn test_consumer_acl_group_matches_route_whitelist() {
    let h = harness().await;
    let consumer = h
        .control_plane
        .consumers()
        .create(NewConsumer {
            cluster_name: CLUSTER.into(),
            org_id: "1".into(),
            project_id: "7".into(),
            env: "TEST".into(),
            name: "app".into(),
            description: String::new(),
        })
        .await
        .unwrap();
    let mut req = address_request("/orders", None, "http://orders:8080", &consumer.id);
    req.policies = vec!["key-auth".into()];

    let route = h.control_plane.routes().create(req).await.unwrap();

    let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
    let acl = plugins.iter().find(|p| p.plugin_name == "acl").unwrap();
    let group = acl.config["whitelist"].as_str().unwrap();
    assert_eq!(
        h.adapter.calls_starting_with("create_acl_group"),
        vec![format!("create_acl_group {}/{}", consumer.backend_id, group)]
    );
}

#[tokio::test]
async fn test_runtime_scoped_auth_route_uses_default_consumer() {
    let h = harness().await;
    insert_orders_runtime(&h).await;
    let mut req = runtime_request("/orders", "rs1");
    req.policies = vec!["key-auth".into()];

    let first = h.control_plane.routes().create(req.clone()).await.unwrap();
    req.path = "/orders/v2".into();
    let second = h.control_plane.routes().create(req).await.unwrap();

    let default = h.store.find_consumer("1", "7", "TEST", "default").await.unwrap().unwrap();
    assert_eq!(h.adapter.calls_starting_with("create_consumer").len(), 1);
    assert_eq!(
        h.adapter.calls_starting_with("create_acl_group"),
        vec![format!("create_acl_group {}/{}", default.backend_id, default.id)]
    );
    for route in [&first, &second] {
        assert!(route.need_auth);
        assert!(route.consumer_id.is_none());
        let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
        let acl = plugins.iter().find(|p| p.plugin_name == "acl").unwrap();
        assert_eq!(acl.config["whitelist"], default.id.as_str());
    }
}

#[tokio::test]
async fn test_runtime_scoped_open_route_creates_no_consumer() {
    let h = harness().await;
    insert_orders_runtime(&h).await;

    h.control_plane.routes().create(runtime_request("/orders", "rs1")).await.unwrap();

    assert!(h.adapter.calls_starting_with("create_consumer").is_empty());
    assert!(h.store.find_consumer("1", "7", "TEST", "default").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_changed_target_republishes() {
    let h = harness().await;
    let mut req = address_request("/orders", Some("GET"), "http://orders:8080", "c1");
    req.policies = vec!["rate".into()];
    let route = h.control_plane.routes().create(req.clone()).await.unwrap();
    let backend_route = route.backend_route_id.clone().unwrap();
    h.adapter.clear_calls();

    req.target = RouteTarget::Address {
        address: "http://orders-v2:9090".into(),
        path: String::new(),
    };
    req.policies = vec!["cors".into()];
    let updated = h.control_plane.routes().update(&route.id, req).await.unwrap();

    assert_eq!(updated.state, RouteState::Active);
    assert_eq!(updated.target_address, "http://orders-v2:9090");
    assert_eq!(updated.backend_route_id.as_deref(), Some(backend_route.as_str()));
    assert_eq!(
        h.adapter.calls_starting_with("create_or_update_service"),
        vec!["create_or_update_service orders-v2:9090".to_string()]
    );
    assert_eq!(h.adapter.calls_starting_with("add_plugin"), vec!["add_plugin cors".to_string()]);
    assert_eq!(h.adapter.calls_starting_with("remove_plugin").len(), 1);

    let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
    let names: Vec<&str> = plugins.iter().map(|p| p.plugin_name.as_str()).collect();
    assert_eq!(names, vec!["cors"]);
    let service = h.store.get_service_by_route(&route.id).await.unwrap().unwrap();
    assert_eq!(service.host, "orders-v2");
    assert_eq!(h.store.service_count(), 1);
}

#[tokio::test]
async fn test_update_unchanged_route_skips_republish() {
    let h = harness().await;
    let req = address_request("/orders", Some("GET"), "http://orders:8080", "c1");
    let route = h.control_plane.routes().create(req.clone()).await.unwrap();
    h.adapter.clear_calls();

    h.control_plane.routes().update(&route.id, req).await.unwrap();

    assert!(h.adapter.calls_starting_with("create_or_update_service").is_empty());
    assert!(h.adapter.calls_starting_with("create_or_update_route").is_empty());
}

#[tokio::test]
async fn test_update_keeps_method_of_upstream_bound_route() {
    let h = harness().await;
    let mut req = address_request("/orders", Some("GET"), "http://orders:8080", "c1");
    req.upstream_api_id = Some("up-1".into());
    let route = h.control_plane.routes().create(req.clone()).await.unwrap();

    req.method = Some("POST".into());
    let updated = h.control_plane.routes().update(&route.id, req).await.unwrap();

    assert_eq!(updated.method.as_deref(), Some("GET"));
}

#[tokio::test]
async fn test_update_conflict_excludes_self() {
    let h = harness().await;
    let routes = h.control_plane.routes();
    let a = routes
        .create(address_request("/a", Some("GET"), "http://svc:8080", "c1"))
        .await
        .unwrap();
    let b = routes
        .create(address_request("/b", Some("GET"), "http://svc:8080", "c1"))
        .await
        .unwrap();

    let err = routes
        .update(&b.id, address_request("/a", Some("GET"), "http://svc:8080", "c1"))
        .await
        .unwrap_err();
    match err {
        ControlPlaneError::RouteConflict { existing_id, .. } => assert_eq!(existing_id, a.id),
        other => panic!("unexpected error {:?}", other),
    }

    let mut moved = address_request("/a", Some("GET"), "http://svc:8080", "c1");
    moved.hosts = vec!["only.example.com".into()];
    routes.update(&a.id, moved).await.unwrap();
}

#[tokio::test]
async fn test_update_failure_marks_row_failed() {
    let h = harness().await;
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    let route = h.control_plane.routes().create(req.clone()).await.unwrap();
    h.adapter.fail("create_or_update_service");

    req.target = RouteTarget::Address {
        address: "http://elsewhere:8080".into(),
        path: String::new(),
    };
    let err = h.control_plane.routes().update(&route.id, req).await.unwrap_err();

    assert_eq!(err.error_type(), "service_provision_failed");
    let stored = h.control_plane.routes().get(&route.id).await.unwrap();
    assert_eq!(stored.state, RouteState::Failed);
    assert_eq!(stored.target_address, "http://orders:8080");
}

#[tokio::test]
async fn test_delete_removes_remote_objects_and_rows() {
    let h = harness().await;
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    req.policies = vec!["key-auth".into()];
    let route = h.control_plane.routes().create(req).await.unwrap();
    h.store
        .add_package_api(&PackageApi {
            package_id: "pkg-1".into(),
            route_id: route.id.clone(),
        })
        .await
        .unwrap();
    h.adapter.clear_calls();

    h.control_plane.routes().delete(&route.id).await.unwrap();

    assert_eq!(h.adapter.calls_starting_with("remove_plugin").len(), 2);
    assert_eq!(h.adapter.calls_starting_with("delete_route").len(), 1);
    assert_eq!(h.adapter.calls_starting_with("delete_service").len(), 1);
    assert_eq!(h.store.route_count(), 0);
    assert_eq!(h.store.service_count(), 0);
    assert_eq!(h.store.plugin_count(), 0);
    assert!(h.store.packages_for_route(&route.id).await.unwrap().is_empty());
    assert!(h.control_plane.routes().get(&route.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_refused_for_packaged_runtime_route() {
    let h = harness().await;
    insert_orders_runtime(&h).await;
    let route = h
        .control_plane
        .routes()
        .create(runtime_request("/orders", "rs1"))
        .await
        .unwrap();
    h.store
        .add_package_api(&PackageApi {
            package_id: "pkg-1".into(),
            route_id: route.id.clone(),
        })
        .await
        .unwrap();
    h.adapter.clear_calls();

    let err = h.control_plane.routes().delete(&route.id).await.unwrap_err();

    match err {
        ControlPlaneError::RouteInUse { packages, .. } => assert_eq!(packages, vec!["pkg-1".to_string()]),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(h.adapter.calls().is_empty());
    assert_eq!(h.control_plane.routes().get(&route.id).await.unwrap().state, RouteState::Active);
}

#[tokio::test]
async fn test_delete_failure_leaves_row_deleting() {
    let h = harness().await;
    let route = h
        .control_plane
        .routes()
        .create(address_request("/orders", None, "http://orders:8080", "c1"))
        .await
        .unwrap();
    h.adapter.fail("delete_route");

    let err = h.control_plane.routes().delete(&route.id).await.unwrap_err();
    assert!(!err.is_not_found());
    assert_eq!(h.control_plane.routes().get(&route.id).await.unwrap().state, RouteState::Deleting);
}

#[tokio::test]
async fn test_dropping_auth_removes_acl() {
    let h = harness().await;
    let mut req = address_request("/orders", None, "http://orders:8080", "c1");
    req.policies = vec!["key-auth".into(), "rate".into()];
    let route = h.control_plane.routes().create(req.clone()).await.unwrap();
    assert_eq!(h.store.plugin_count(), 3);
    h.adapter.clear_calls();

    req.policies = vec!["oauth2".into(), "rate".into()];
    let switched = h.control_plane.routes().update(&route.id, req.clone()).await.unwrap();
    assert!(switched.need_auth);
    assert_eq!(h.adapter.calls_starting_with("touch_route_oauth_method").len(), 1);
    // plugins are matched by name, so switching auth type is an add plus a remove; acl stays
    assert_eq!(h.adapter.calls_starting_with("add_plugin"), vec!["add_plugin oauth2".to_string()]);
    assert_eq!(h.adapter.calls_starting_with("remove_plugin").len(), 1);
    assert_eq!(h.store.plugin_count(), 3);
    h.adapter.clear_calls();

    req.policies = vec!["rate".into()];
    let open = h.control_plane.routes().update(&route.id, req).await.unwrap();

    assert!(!open.need_auth);
    assert_eq!(h.adapter.calls_starting_with("remove_plugin").len(), 2);
    let plugins = h.store.list_plugins_by_route(&route.id).await.unwrap();
    let names: Vec<&str> = plugins.iter().map(|p| p.plugin_name.as_str()).collect();
    assert_eq!(names, vec!["rate-limiting"]);
}
