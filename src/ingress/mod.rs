//! # Ingress Module
//!
//! Kubernetes Ingress management for zones whose cluster is reached through an
//! ingress controller. The [`IngressClient`] trait is the seam the zone
//! manager programs against; [`KubeIngressClient`] implements it with `kube`.
//!
//! ## Key Features
//! - Create-or-update that reports whether the Ingress already existed
//! - Delete that treats a missing Ingress as success
//! - Annotation handling that keeps unrelated existing annotations on update
//! - Per-cluster client lookup through [`IngressRegistry`]

pub mod kubernetes;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend as K8sIngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};

pub use kubernetes::KubeIngressClient;

pub const REWRITE_HOST_KEY: &str = "nginx.ingress.kubernetes.io/upstream-vhost";
pub const REWRITE_PATH_KEY: &str = "nginx.ingress.kubernetes.io/rewrite-target";
pub const USE_REGEX_KEY: &str = "nginx.ingress.kubernetes.io/use-regex";
pub const BACKEND_PROTOCOL_KEY: &str = "nginx.ingress.kubernetes.io/backend-protocol";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gateway-control-plane";

/// Host and path routed by an Ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRoute {
    pub domain: String,
    pub path: String,
}

/// Kubernetes service an Ingress forwards to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackendRef {
    pub service_name: String,
    pub service_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendProtocol {
    Http,
    Https,
    Grpc,
    Grpcs,
    Fcgi,
}

impl BackendProtocol {
    pub fn as_annotation(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Grpc => "GRPC",
            Self::Grpcs => "GRPCS",
            Self::Fcgi => "FCGI",
        }
    }
}

/// Per-Ingress routing options rendered as annotations
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    pub rewrite_host: Option<String>,
    pub rewrite_path: Option<String>,
    pub use_regex: bool,
    pub enable_tls: bool,
    pub backend_protocol: Option<BackendProtocol>,
    /// Extra annotations; `None` removes the key
    pub annotations: BTreeMap<String, Option<String>>,
}

/// Merge `options` into the annotations already present on an Ingress
pub fn merge_annotations(existing: &BTreeMap<String, String>, options: &RouteOptions) -> BTreeMap<String, String> {
    let mut annotations = existing.clone();
    if let Some(host) = &options.rewrite_host {
        annotations.insert(REWRITE_HOST_KEY.to_string(), host.clone());
    }
    if let Some(path) = &options.rewrite_path {
        annotations.insert(REWRITE_PATH_KEY.to_string(), path.clone());
    }
    if options.use_regex {
        annotations.insert(USE_REGEX_KEY.to_string(), "true".to_string());
    }
    match options.backend_protocol {
        Some(protocol) => {
            annotations.insert(BACKEND_PROTOCOL_KEY.to_string(), protocol.as_annotation().to_string());
        }
        None => {
            annotations.remove(BACKEND_PROTOCOL_KEY);
        }
    }
    for (key, value) in &options.annotations {
        match value {
            Some(v) => {
                annotations.insert(key.clone(), v.clone());
            }
            None => {
                annotations.remove(key);
            }
        }
    }
    annotations
}

/// Build the desired Ingress object. Names are lowercased.
pub fn build_ingress(
    namespace: &str,
    name: &str,
    routes: &[IngressRoute],
    backend: &IngressBackendRef,
    ingress_class: Option<&str>,
    options: &RouteOptions,
    annotations: BTreeMap<String, String>,
) -> Ingress {
    let path_type = if options.use_regex { "ImplementationSpecific" } else { "Prefix" };
    let service_backend = K8sIngressBackend {
        service: Some(IngressServiceBackend {
            name: backend.service_name.clone(),
            port: Some(ServiceBackendPort {
                number: Some(i32::from(backend.service_port)),
                name: None,
            }),
        }),
        resource: None,
    };

    let mut by_host: BTreeMap<&str, Vec<HTTPIngressPath>> = BTreeMap::new();
    for route in routes {
        by_host.entry(route.domain.as_str()).or_default().push(HTTPIngressPath {
            path: Some(if route.path.is_empty() { "/".to_string() } else { route.path.clone() }),
            path_type: path_type.to_string(),
            backend: service_backend.clone(),
        });
    }
    let rules = by_host
        .into_iter()
        .map(|(host, paths)| IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue { paths }),
        })
        .collect();

    let tls = options.enable_tls.then(|| {
        vec![IngressTLS {
            hosts: Some(routes.iter().map(|r| r.domain.clone()).collect()),
            secret_name: None,
        }]
    });

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_lowercase()),
            namespace: Some(namespace.to_string()),
            annotations: if annotations.is_empty() { None } else { Some(annotations) },
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: ingress_class.filter(|c| !c.is_empty()).map(str::to_lowercase),
            rules: Some(rules),
            tls,
            ..Default::default()
        }),
        status: None,
    }
}

/// Ingress operations the zone manager depends on
#[async_trait]
pub trait IngressClient: Send + Sync {
    /// Create or replace an Ingress; returns whether it already existed.
    ///
    /// A non-empty `provider` selects the ingress class.
    async fn create_or_update_ingress(
        &self,
        namespace: &str,
        name: &str,
        routes: &[IngressRoute],
        backend: &IngressBackendRef,
        provider: &str,
        options: &RouteOptions,
    ) -> ControlPlaneResult<bool>;

    /// Delete an Ingress; a missing one is not an error
    async fn delete_ingress(&self, namespace: &str, name: &str) -> ControlPlaneResult<()>;

    /// First port of a Kubernetes service, if the service exists
    async fn service_port(&self, namespace: &str, name: &str) -> ControlPlaneResult<Option<u16>>;

    /// Whether the gateway service exposes its HTTPS port
    async fn gateway_supports_https(&self, namespace: &str, service: &str) -> ControlPlaneResult<bool>;
}

/// Ingress clients keyed by cluster name
#[derive(Default)]
pub struct IngressRegistry {
    clients: DashMap<String, Arc<dyn IngressClient>>,
}

impl IngressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster_name: &str, client: Arc<dyn IngressClient>) {
        self.clients.insert(cluster_name.to_string(), client);
    }

    pub fn client_for(&self, cluster_name: &str) -> ControlPlaneResult<Arc<dyn IngressClient>> {
        self.clients
            .get(cluster_name)
            .map(|c| c.clone())
            .ok_or_else(|| ControlPlaneError::config(format!("no ingress client for cluster '{}'", cluster_name)))
    }
}
