//! # Gateway Control Plane - Core Library Crate
//!
//! Provisions and reconciles published APIs across interchangeable gateway
//! backends. A caller describes an API (path, method, target, policies) and
//! the control plane creates the upstream service, the route, its plugins and,
//! where the cluster routes through Kubernetes Ingress, the zone's Ingress.
//!
//! ## Layout
//!
//! - [`core`]: errors, configuration and the persisted domain types
//! - [`routing`]: path template parsing, regex compilation and rewrite alignment
//! - [`gateway`]: the backend capability interface and its two families
//! - [`ingress`]: Kubernetes Ingress management
//! - [`store`]: persistence seams and the in-memory implementation
//! - [`provision`]: route, policy, consumer and zone operations
//! - [`control_plane`]: wiring of all of the above
//!
//! ## Consistency model
//!
//! Every operation runs synchronously on the caller's task. Multi-step creates
//! compensate on failure on a best-effort basis; there is no background
//! reconciliation and no cross-call locking.

/// Core functionality including error types, configuration, and domain types
pub mod core;

/// Structured logging setup and per-call timing
pub mod observability;

/// Path template compiler used for regex routes and rewrites
pub mod routing;

/// Gateway backend adapters (self-hosted admin API and managed cloud)
pub mod gateway;

/// Kubernetes Ingress client and registry
pub mod ingress;

/// Persistence traits and the DashMap-backed store
pub mod store;

/// Provisioning and reconciliation engine
pub mod provision;

/// Composition root
pub mod control_plane;

/// Main error type used throughout the control plane
pub use core::error::{ControlPlaneError, ControlPlaneResult};

/// Top-level configuration
pub use core::config::ControlPlaneConfig;

pub use control_plane::{ControlPlane, Manifest};
pub use gateway::{AdapterCapabilities, GatewayAdapter};
pub use store::{MemoryStore, Store};
