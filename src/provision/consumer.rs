//! Consumer identities and their credentials.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{Consumer, Credential};
use crate::gateway::dto::{ConsumerRequest, CredentialRequest};
use crate::gateway::{AdapterRegistry, GatewayAdapter};
use crate::provision::policy::OAUTH2_PLUGIN;
use crate::provision::tolerate_not_found;
use crate::store::Store;

pub const KEY_AUTH: &str = "key-auth";
pub const SIGN_AUTH: &str = "sign-auth";
pub const HMAC_AUTH: &str = "hmac-auth";

/// Auth types every consumer is provisioned with, in creation order
pub const AUTH_TYPES: [&str; 4] = [KEY_AUTH, OAUTH2_PLUGIN, SIGN_AUTH, HMAC_AUTH];

/// Consumer that runtime-scoped routes in an environment share for their ACL
pub const DEFAULT_CONSUMER_NAME: &str = "default";

const NONE_REDIRECT: &str = "http://none";

/// Credentials grouped by auth type
pub type CredentialSet = BTreeMap<String, Vec<Credential>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConsumer {
    pub cluster_name: String,
    pub org_id: String,
    pub project_id: String,
    pub env: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialDiff {
    pub adds: Vec<Credential>,
    pub deletes: Vec<Credential>,
}

/// Compare credentials by id, per auth type present in `desired`.
///
/// Desired entries with an unknown or empty id are additions; current entries
/// the desired list no longer mentions are deletions. Auth types absent from
/// `desired` are left alone.
pub fn diff_credentials(current: &CredentialSet, desired: &CredentialSet) -> CredentialDiff {
    let mut diff = CredentialDiff::default();
    for (auth_type, wanted) in desired {
        let Some(existing) = current.get(auth_type) else {
            diff.adds.extend(wanted.iter().cloned());
            continue;
        };
        let mut remaining: Vec<&Credential> = existing.iter().collect();
        for credential in wanted {
            match remaining.iter().position(|c| !credential.id.is_empty() && c.id == credential.id) {
                Some(pos) => {
                    remaining.remove(pos);
                }
                None => diff.adds.push(credential.clone()),
            }
        }
        diff.deletes.extend(remaining.into_iter().cloned());
    }
    diff
}

/// Fill in oauth2 redirect URLs the gateway would reject
pub fn normalize_redirects(config: &mut Value) {
    let normalized = match config.get("redirect_uris") {
        None | Some(Value::Null) => vec![NONE_REDIRECT.to_string()],
        Some(Value::String(url)) => {
            if url.starts_with("http") {
                vec![url.clone()]
            } else {
                vec![format!("http://{}", url)]
            }
        }
        Some(Value::Array(urls)) => urls
            .iter()
            .map(|u| match u.as_str().unwrap_or_default() {
                "" => NONE_REDIRECT.to_string(),
                bare @ ("http://" | "https://") => format!("{}none", bare),
                url => url.to_string(),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    };
    if let Some(obj) = config.as_object_mut() {
        obj.insert("redirect_uris".to_string(), json!(normalized));
    }
}

/// Name the consumer is registered under on the gateway backend
pub fn backend_consumer_name(consumer: &Consumer) -> String {
    if consumer.project_id.is_empty() {
        return consumer.name.clone();
    }
    format!(
        "{}.{}.{}.{}:{}",
        consumer.org_id, consumer.project_id, consumer.env, consumer.cluster_name, consumer.name
    )
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub struct ConsumerProvisioner {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn Store>,
}

impl ConsumerProvisioner {
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    pub async fn get(&self, consumer_id: &str) -> ControlPlaneResult<Consumer> {
        self.store
            .get_consumer(consumer_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("consumer", consumer_id))
    }

    /// Register a consumer on the backend with an ACL group and default credentials
    #[instrument(skip_all, fields(cluster = %req.cluster_name, consumer = %req.name))]
    pub async fn create(&self, req: NewConsumer) -> ControlPlaneResult<Consumer> {
        for (field, value) in [
            ("org_id", &req.org_id),
            ("project_id", &req.project_id),
            ("env", &req.env),
            ("name", &req.name),
        ] {
            if value.trim().is_empty() {
                return Err(ControlPlaneError::invalid_request(field, "is required"));
            }
        }
        if self
            .store
            .find_consumer(&req.org_id, &req.project_id, &req.env, &req.name)
            .await?
            .is_some()
        {
            return Err(ControlPlaneError::ConsumerExists { name: req.name });
        }

        self.registry.cluster(&req.cluster_name)?;
        let adapter = self.registry.adapter_for(&req.cluster_name)?;

        let id = Uuid::new_v4().simple().to_string();
        let mut consumer = Consumer {
            id: id.clone(),
            name: req.name,
            org_id: req.org_id,
            project_id: req.project_id,
            env: req.env,
            cluster_name: req.cluster_name,
            backend_name: String::new(),
            backend_id: String::new(),
            description: req.description,
            created_at: Utc::now(),
        };
        consumer.backend_name = backend_consumer_name(&consumer);

        let resp = adapter
            .create_consumer(&ConsumerRequest {
                id: None,
                username: consumer.backend_name.clone(),
                custom_id: Some(id),
            })
            .await?;
        consumer.backend_id = resp.id;
        self.store.insert_consumer(&consumer).await?;

        adapter
            .create_acl_group(&consumer.backend_id, &consumer.id)
            .await?;

        let key = Uuid::new_v4().simple().to_string();
        let secret = random_secret();
        let defaults = [
            (KEY_AUTH, json!({ "key": key })),
            (
                OAUTH2_PLUGIN,
                json!({
                    "name": "App",
                    "redirect_uris": [NONE_REDIRECT],
                    "client_id": key,
                    "client_secret": secret,
                }),
            ),
            (SIGN_AUTH, json!({ "key": key, "secret": secret })),
            (HMAC_AUTH, json!({ "key": key, "secret": secret })),
        ];
        for (plugin, config) in defaults {
            self.create_credential(adapter.as_ref(), &consumer, plugin, config).await?;
        }

        info!(consumer_id = %consumer.id, backend_id = %consumer.backend_id, "consumer created");
        Ok(consumer)
    }

    /// Default consumer of an environment, created on first use
    #[instrument(skip(self))]
    pub async fn ensure_default(
        &self,
        cluster_name: &str,
        org_id: &str,
        project_id: &str,
        env: &str,
    ) -> ControlPlaneResult<Consumer> {
        if let Some(existing) = self
            .store
            .find_consumer(org_id, project_id, env, DEFAULT_CONSUMER_NAME)
            .await?
        {
            return Ok(existing);
        }
        let created = self
            .create(NewConsumer {
                cluster_name: cluster_name.to_string(),
                org_id: org_id.to_string(),
                project_id: project_id.to_string(),
                env: env.to_string(),
                name: DEFAULT_CONSUMER_NAME.to_string(),
                description: "default consumer".to_string(),
            })
            .await;
        match created {
            Ok(consumer) => Ok(consumer),
            // lost a race with a concurrent create
            Err(ControlPlaneError::ConsumerExists { .. }) => self
                .store
                .find_consumer(org_id, project_id, env, DEFAULT_CONSUMER_NAME)
                .await?
                .ok_or_else(|| ControlPlaneError::not_found("consumer", DEFAULT_CONSUMER_NAME)),
            Err(e) => Err(e),
        }
    }

    /// Create one credential remotely and record it. Returns `None` when the
    /// backend does not have the auth plugin enabled.
    async fn create_credential(
        &self,
        adapter: &dyn GatewayAdapter,
        consumer: &Consumer,
        plugin_name: &str,
        config: Value,
    ) -> ControlPlaneResult<Option<Credential>> {
        let must_check = plugin_name == HMAC_AUTH || !adapter.capabilities().remote_credentials;
        if must_check && !adapter.check_plugin_enabled(plugin_name).await? {
            warn!(plugin = plugin_name, "auth plugin not enabled, credential skipped");
            return Ok(None);
        }
        let resp = adapter
            .create_credential(&CredentialRequest {
                consumer_id: consumer.backend_id.clone(),
                plugin_name: plugin_name.to_string(),
                config: config.clone(),
            })
            .await?;
        let credential = Credential {
            id: resp.id,
            consumer_id: consumer.id.clone(),
            plugin_name: plugin_name.to_string(),
            config: if resp.config.is_null() { config } else { resp.config },
        };
        self.store.insert_credential(&credential).await?;
        Ok(Some(credential))
    }

    /// Credentials of a consumer grouped by auth type.
    ///
    /// Backends that keep credentials remotely are asked directly; a failed
    /// listing yields an empty group. Others are served from the store.
    pub async fn get_credentials(&self, consumer_id: &str) -> ControlPlaneResult<CredentialSet> {
        let consumer = self.get(consumer_id).await?;
        let adapter = self.registry.adapter_for(&consumer.cluster_name)?;
        let mut set: CredentialSet = AUTH_TYPES.iter().map(|t| (t.to_string(), Vec::new())).collect();

        if adapter.capabilities().remote_credentials {
            for auth_type in AUTH_TYPES {
                let listed = match adapter.get_credential_list(&consumer.backend_id, auth_type).await {
                    Ok(list) => list,
                    Err(e) => {
                        warn!(plugin = auth_type, error = %e, "credential listing failed");
                        Vec::new()
                    }
                };
                let group = set.entry(auth_type.to_string()).or_default();
                group.extend(listed.into_iter().map(|c| Credential {
                    id: c.id,
                    consumer_id: consumer.id.clone(),
                    plugin_name: auth_type.to_string(),
                    config: c.config,
                }));
            }
        } else {
            for credential in self.store.list_credentials(&consumer.id).await? {
                if let Some(group) = set.get_mut(&credential.plugin_name) {
                    group.push(credential);
                }
            }
        }
        Ok(set)
    }

    /// Bring the consumer's credentials in line with `desired`: deletes first, then adds
    #[instrument(skip_all, fields(consumer_id = %consumer_id))]
    pub async fn update_credentials(&self, consumer_id: &str, desired: CredentialSet) -> ControlPlaneResult<CredentialSet> {
        let consumer = self.get(consumer_id).await?;
        let adapter = self.registry.adapter_for(&consumer.cluster_name)?;
        let current = self.get_credentials(consumer_id).await?;
        let diff = diff_credentials(&current, &desired);

        for credential in &diff.deletes {
            tolerate_not_found(
                adapter
                    .delete_credential(&consumer.backend_id, &credential.plugin_name, &credential.id)
                    .await,
            )?;
            self.store.delete_credential(&credential.id).await?;
        }
        for credential in &diff.adds {
            let mut config = credential.config.clone();
            if credential.plugin_name == OAUTH2_PLUGIN {
                normalize_redirects(&mut config);
            }
            self.create_credential(adapter.as_ref(), &consumer, &credential.plugin_name, config)
                .await?;
        }

        info!(adds = diff.adds.len(), deletes = diff.deletes.len(), "credentials updated");
        self.get_credentials(consumer_id).await
    }

    pub async fn grant_package(&self, consumer_id: &str, package_id: &str) -> ControlPlaneResult<()> {
        self.get(consumer_id).await?;
        self.store.grant_package(package_id, consumer_id).await
    }

    /// Remove package grants, backend state, credential rows and the consumer row
    #[instrument(skip_all, fields(consumer_id = %consumer_id))]
    pub async fn delete(&self, consumer_id: &str) -> ControlPlaneResult<()> {
        let consumer = self.get(consumer_id).await?;
        let adapter = self.registry.adapter_for(&consumer.cluster_name)?;

        self.store.revoke_consumer_grants(consumer_id).await?;

        let credentials = self.store.list_credentials(consumer_id).await?;
        if !adapter.capabilities().remote_credentials {
            for credential in &credentials {
                tolerate_not_found(
                    adapter
                        .delete_credential(&consumer.backend_id, &credential.plugin_name, &credential.id)
                        .await,
                )?;
            }
        }
        tolerate_not_found(adapter.delete_consumer(&consumer.backend_id).await)?;

        for credential in &credentials {
            self.store.delete_credential(&credential.id).await?;
        }
        self.store.delete_consumer(consumer_id).await?;
        info!(credentials = credentials.len(), "consumer deleted");
        Ok(())
    }
}
