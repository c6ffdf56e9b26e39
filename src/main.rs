//! # Gateway Control Plane - Main Entry Point
//!
//! Loads configuration, installs logging, builds one Ingress client per
//! ingress-capable cluster, seeds the policy catalog and optionally applies a
//! declarative manifest.
//!
//! ## Environment
//! - `CONTROL_PLANE_CONFIG`: configuration file (default `config/control-plane.yaml`)
//! - `CONTROL_PLANE_MANIFEST`: optional YAML manifest to apply after startup
//! - `CONTROL_PLANE_*`: individual overrides, see `core::config`

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};

use gateway_control_plane::core::config::ControlPlaneConfig;
use gateway_control_plane::ingress::{IngressRegistry, KubeIngressClient};
use gateway_control_plane::observability::init_logging;
use gateway_control_plane::{ControlPlane, Manifest, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Step 1: Load and validate configuration
    let config_path =
        std::env::var("CONTROL_PLANE_CONFIG").unwrap_or_else(|_| "config/control-plane.yaml".to_string());
    let config = ControlPlaneConfig::load(&config_path)
        .await
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    // Step 2: Logging
    init_logging(&config.logging);
    info!("🚀 Starting gateway control plane");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(clusters = config.clusters.len(), "📋 Configuration loaded from {}", config_path);

    // Step 3: Ingress clients for clusters that route through Kubernetes
    let ingress = Arc::new(build_ingress_registry(&config).await);

    // Step 4: Wire components
    let store = Arc::new(MemoryStore::new());
    let control_plane = ControlPlane::new(config, store, ingress);
    control_plane
        .seed_policies()
        .await
        .context("failed to seed the policy catalog")?;

    // Step 5: Optional manifest
    if let Ok(manifest_path) = std::env::var("CONTROL_PLANE_MANIFEST") {
        info!("📦 Applying manifest {}", manifest_path);
        let manifest = Manifest::load(&manifest_path)
            .await
            .with_context(|| format!("failed to load manifest from {}", manifest_path))?;
        let report = control_plane.apply_manifest(manifest).await;
        let failed = report.iter().filter(|e| e.result.is_err()).count();
        if failed > 0 {
            error!(failed, total = report.len(), "❌ Manifest applied with failures");
        } else {
            info!(total = report.len(), "✅ Manifest applied");
        }
    }

    info!("🏁 Control plane startup complete");
    Ok(())
}

async fn build_ingress_registry(config: &ControlPlaneConfig) -> IngressRegistry {
    let registry = IngressRegistry::new();
    for (name, cluster) in &config.clusters {
        if !cluster.ingress_capable() || config.routing.use_admin_endpoint {
            continue;
        }
        match KubeIngressClient::from_context(cluster.kube_context.as_deref(), config.routing.admin_https_port).await {
            Ok(client) => {
                info!(cluster = %name, "🔗 Ingress client ready");
                registry.register(name, Arc::new(client));
            }
            Err(e) => warn!(cluster = %name, error = %e, "⚠️  Ingress client unavailable, zones on this cluster get no ingress"),
        }
    }
    registry
}
