//! # Provisioning Module
//!
//! The multi-step operations that keep the store, the gateway backend and the
//! cluster's Ingress objects in step:
//!
//! - [`route::RouteProvisioner`]: create, update and delete of published APIs
//! - [`policy::PolicyReconciler`]: plugin diffing and application per route
//! - [`consumer::ConsumerProvisioner`]: consumer identities and credentials
//! - [`zone::ZoneIngressManager`]: zones, their Ingress and the domain policy
//! - [`compensation::Compensation`]: best-effort rollback of partial creates
//!
//! Everything runs on the caller's task; nothing is retried automatically.

pub mod compensation;
pub mod consumer;
pub mod policy;
pub mod route;
pub mod zone;

use crate::core::error::ControlPlaneResult;

pub use compensation::{Compensation, UndoStep};
pub use consumer::{ConsumerProvisioner, CredentialSet, NewConsumer};
pub use policy::{AppliedChange, DesiredPolicy, PolicyDiff, PolicyReconciler};
pub use route::RouteProvisioner;
pub use zone::{ZoneConfig, ZoneIngressManager, ZoneRoute};

/// Treat a not-found failure of a delete as success
pub(crate) fn tolerate_not_found(result: ControlPlaneResult<()>) -> ControlPlaneResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
