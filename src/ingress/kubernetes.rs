//! `kube`-backed [`IngressClient`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::ingress::{
    build_ingress, merge_annotations, IngressBackendRef, IngressClient, IngressRoute, RouteOptions,
};

/// Manages `networking.k8s.io/v1` Ingress objects in one cluster
#[derive(Clone)]
pub struct KubeIngressClient {
    client: Client,
    https_port: u16,
}

impl KubeIngressClient {
    pub fn new(client: Client, https_port: u16) -> Self {
        Self { client, https_port }
    }

    /// Build a client from the default kubeconfig, or a named context
    pub async fn from_context(context: Option<&str>, https_port: u16) -> ControlPlaneResult<Self> {
        let client = match context {
            Some(ctx) => {
                let options = kube::config::KubeConfigOptions {
                    context: Some(ctx.to_string()),
                    ..Default::default()
                };
                let config = kube::Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| ControlPlaneError::config(format!("kubeconfig context '{}': {}", ctx, e)))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self::new(client, https_port))
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl IngressClient for KubeIngressClient {
    async fn create_or_update_ingress(
        &self,
        namespace: &str,
        name: &str,
        routes: &[IngressRoute],
        backend: &IngressBackendRef,
        provider: &str,
        options: &RouteOptions,
    ) -> ControlPlaneResult<bool> {
        let api = self.ingresses(namespace);
        let ingress_name = name.to_lowercase();
        let existing = api.get_opt(&ingress_name).await?;

        match existing {
            None => {
                let annotations = merge_annotations(&BTreeMap::new(), options);
                let ingress = build_ingress(namespace, &ingress_name, routes, backend, Some(provider), options, annotations);
                debug!(name = %ingress_name, namespace, "begin create ingress");
                api.create(&PostParams::default(), &ingress).await.map_err(|e| {
                    ControlPlaneError::ingress(format!("create ingress {} failed, ns:{}, err:{}", ingress_name, namespace, e))
                })?;
                info!(name = %ingress_name, namespace, "new ingress created");
                Ok(false)
            }
            Some(current) => {
                let old_annotations = current.metadata.annotations.clone().unwrap_or_default();
                let annotations = merge_annotations(&old_annotations, options);
                let mut ingress = build_ingress(namespace, &ingress_name, routes, backend, Some(provider), options, annotations);
                ingress.metadata.resource_version = current.metadata.resource_version.clone();
                debug!(name = %ingress_name, namespace, "begin update ingress");
                api.replace(&ingress_name, &PostParams::default(), &ingress).await.map_err(|e| {
                    ControlPlaneError::ingress(format!("update ingress {} failed, ns:{}, err:{}", ingress_name, namespace, e))
                })?;
                info!(name = %ingress_name, namespace, "ingress updated");
                Ok(true)
            }
        }
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ControlPlaneResult<()> {
        let ingress_name = name.to_lowercase();
        match self.ingresses(namespace).delete(&ingress_name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name = %ingress_name, namespace, "ingress deleted");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                warn!(name = %ingress_name, namespace, "ingress not found");
                Ok(())
            }
            Err(e) => Err(ControlPlaneError::ingress(format!(
                "delete ingress {} failed, ns:{}, err:{}",
                ingress_name, namespace, e
            ))),
        }
    }

    async fn service_port(&self, namespace: &str, name: &str) -> ControlPlaneResult<Option<u16>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get_opt(name).await?;
        Ok(service
            .and_then(|svc| svc.spec)
            .and_then(|spec| spec.ports)
            .and_then(|ports| ports.first().map(|p| p.port))
            .and_then(|port| u16::try_from(port).ok()))
    }

    async fn gateway_supports_https(&self, namespace: &str, service: &str) -> ControlPlaneResult<bool> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = services
            .get_opt(service)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("gateway service", format!("{}/{}", namespace, service)))?;
        Ok(svc
            .spec
            .and_then(|spec| spec.ports)
            .map(|ports| ports.iter().any(|p| p.port == i32::from(self.https_port)))
            .unwrap_or(false))
    }
}
