//! # Consumer Provisioning Tests

mod common;

use common::*;
use gateway_control_plane::core::types::Credential;
use gateway_control_plane::provision::{CredentialSet, NewConsumer};
use gateway_control_plane::store::*;
use gateway_control_plane::ControlPlaneError;
use serde_json::json;

fn new_consumer(name: &str) -> NewConsumer {
    NewConsumer {
        cluster_name: CLUSTER.into(),
        org_id: "1".into(),
        project_id: "7".into(),
        env: "TEST".into(),
        name: name.into(),
        description: "mobile app".into(),
    }
}

#[tokio::test]
async fn test_create_registers_acl_and_default_credentials() {
    let h = harness().await;

    let consumer = h.control_plane.consumers().create(new_consumer("app")).await.unwrap();

    assert_eq!(consumer.backend_name, "1.7.TEST.test-cluster:app");
    assert_eq!(consumer.id.len(), 32);
    assert_eq!(
        h.adapter.calls_starting_with("create_acl_group"),
        vec![format!("create_acl_group {}/{}", consumer.backend_id, consumer.id)]
    );
    assert_eq!(
        h.adapter.calls_starting_with("create_credential"),
        vec![
            "create_credential key-auth".to_string(),
            "create_credential oauth2".to_string(),
            "create_credential sign-auth".to_string(),
            "create_credential hmac-auth".to_string(),
        ]
    );

    let credentials = h.control_plane.consumers().get_credentials(&consumer.id).await.unwrap();
    assert_eq!(credentials.len(), 4);
    let key = &credentials["key-auth"][0].config["key"];
    let oauth = &credentials["oauth2"][0].config;
    assert_eq!(&oauth["client_id"], key);
    assert_eq!(oauth["redirect_uris"], json!(["http://none"]));
    assert_eq!(oauth["client_secret"].as_str().unwrap().len(), 32);
}

#[tokio::test]
async fn test_create_skips_disabled_hmac() {
    let h = harness().await;
    h.adapter.disable_plugin("hmac-auth");

    let consumer = h.control_plane.consumers().create(new_consumer("app")).await.unwrap();

    assert!(!h.adapter.calls().contains(&"create_credential hmac-auth".to_string()));
    let credentials = h.control_plane.consumers().get_credentials(&consumer.id).await.unwrap();
    assert!(credentials["hmac-auth"].is_empty());
    assert_eq!(credentials["key-auth"].len(), 1);
}

#[tokio::test]
async fn test_duplicate_and_invalid_consumers() {
    let h = harness().await;
    let consumers = h.control_plane.consumers();
    consumers.create(new_consumer("app")).await.unwrap();

    let err = consumers.create(new_consumer("app")).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::ConsumerExists { .. }));

    let mut missing = new_consumer("other");
    missing.env = " ".into();
    assert!(consumers.create(missing).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_update_credentials_deletes_then_adds() {
    let h = harness().await;
    let consumers = h.control_plane.consumers();
    let consumer = consumers.create(new_consumer("app")).await.unwrap();
    let current = consumers.get_credentials(&consumer.id).await.unwrap();
    let old_key = current["key-auth"][0].clone();
    h.adapter.clear_calls();

    let mut desired = CredentialSet::new();
    desired.insert(
        "key-auth".into(),
        vec![Credential {
            id: String::new(),
            consumer_id: consumer.id.clone(),
            plugin_name: "key-auth".into(),
            config: json!({ "key": "rotated" }),
        }],
    );
    desired.insert(
        "oauth2".into(),
        vec![
            current["oauth2"][0].clone(),
            Credential {
                id: String::new(),
                consumer_id: consumer.id.clone(),
                plugin_name: "oauth2".into(),
                config: json!({ "name": "Web", "redirect_uris": ["", "https://"] }),
            },
        ],
    );

    let updated = consumers.update_credentials(&consumer.id, desired).await.unwrap();

    let calls = h.adapter.calls();
    let delete_at = calls.iter().position(|c| c.starts_with("delete_credential")).unwrap();
    let add_at = calls.iter().position(|c| c.starts_with("create_credential")).unwrap();
    assert!(delete_at < add_at);
    assert_eq!(calls[delete_at], format!("delete_credential key-auth/{}", old_key.id));

    assert_eq!(updated["key-auth"].len(), 1);
    assert_eq!(updated["key-auth"][0].config["key"], "rotated");
    assert_eq!(updated["oauth2"].len(), 2);
    let web = updated["oauth2"].iter().find(|c| c.config["name"] == "Web").unwrap();
    assert_eq!(web.config["redirect_uris"], json!(["http://none", "https://none"]));
    // auth types missing from the request are untouched
    assert_eq!(updated["sign-auth"].len(), 1);
}

#[tokio::test]
async fn test_remote_credentials_are_listed_from_backend() {
    let mut adapter = FakeAdapter::new();
    adapter.caps.remote_credentials = true;
    let h = harness_with(test_config(), adapter).await;
    let consumer = h.control_plane.consumers().create(new_consumer("app")).await.unwrap();
    h.adapter.clear_calls();

    let credentials = h.control_plane.consumers().get_credentials(&consumer.id).await.unwrap();

    assert_eq!(h.adapter.calls_starting_with("get_credential_list").len(), 4);
    assert!(credentials.values().all(Vec::is_empty));
}

#[tokio::test]
async fn test_delete_consumer_revokes_grants_and_credentials() {
    let h = harness().await;
    let consumers = h.control_plane.consumers();
    let consumer = consumers.create(new_consumer("app")).await.unwrap();
    consumers.grant_package(&consumer.id, "pkg-1").await.unwrap();
    assert_eq!(h.store.package_grants(&consumer.id).await.unwrap(), vec!["pkg-1".to_string()]);
    h.adapter.clear_calls();

    consumers.delete(&consumer.id).await.unwrap();

    assert_eq!(h.adapter.calls_starting_with("delete_credential").len(), 4);
    assert_eq!(
        h.adapter.calls_starting_with("delete_consumer"),
        vec![format!("delete_consumer {}", consumer.backend_id)]
    );
    assert!(h.store.package_grants(&consumer.id).await.unwrap().is_empty());
    assert!(h.store.list_credentials(&consumer.id).await.unwrap().is_empty());
    assert!(consumers.get(&consumer.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_grant_requires_existing_consumer() {
    let h = harness().await;
    let err = h.control_plane.consumers().grant_package("ghost", "pkg-1").await.unwrap_err();
    assert!(err.is_not_found());
}
