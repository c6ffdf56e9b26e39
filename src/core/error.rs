//! # Error Handling Module
//!
//! Every fallible operation in the control plane returns [`ControlPlaneResult`].
//! The variants mirror the failure classes a caller has to tell apart:
//! validation failures that are returned before any remote call, conflicts that
//! carry the id of the route already holding the (path, method, hosts) slot,
//! and mid-transaction failures raised after best-effort compensation ran.
//!
//! Raw transport and backend failures (`Backend`, `HttpClient`, ...) are
//! re-classified by the provisioners into the step-specific kinds
//! (`ServiceProvisionFailed`, `RoutePublishFailed`, `PluginApplyFailed`) via
//! [`ControlPlaneError::classify`].

use reqwest::StatusCode;
use thiserror::Error;

/// Main result type used throughout the control plane
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Error kinds surfaced by the provisioning engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlPlaneError {
    /// A path template has unbalanced, nested or empty braces
    #[error("Malformed path template '{path}': {reason}")]
    MalformedPathTemplate { path: String, reason: String },

    /// The rewrite path references a variable the route path does not declare
    #[error("Rewrite variable '{variable}' is not bound by route path '{path}'")]
    UnboundRewriteVariable { variable: String, path: String },

    /// Another active route already serves the same path, method and host
    #[error("Route conflict: path[{path}] method[{method}] already served by route {existing_id}")]
    RouteConflict {
        path: String,
        method: String,
        existing_id: String,
    },

    /// The route is grouped into packages and bound to a runtime service
    #[error("Route {route_id} is in use by packages {packages:?}")]
    RouteInUse {
        route_id: String,
        packages: Vec<String>,
    },

    /// The cluster metadata names a gateway provider we cannot drive
    #[error("Unknown gateway provider '{provider}' for cluster {cluster}")]
    UnknownGatewayProvider { provider: String, cluster: String },

    /// The backend is too old for the requested plugin
    #[error("Plugin {plugin} not supported on gateway version {version}")]
    BackendVersionUnsupported { plugin: String, version: String },

    /// Creating or updating the upstream service failed
    #[error("Service provision failed: {message}")]
    ServiceProvisionFailed { message: String },

    /// Creating or updating the backend route failed
    #[error("Route publish failed: {message}")]
    RoutePublishFailed { message: String },

    /// Adding, updating or removing a plugin failed
    #[error("Plugin {plugin} apply failed: {message}")]
    PluginApplyFailed { plugin: String, message: String },

    /// Request validation errors (missing or malformed fields)
    #[error("Invalid request: {field} - {reason}")]
    InvalidRequest { field: String, reason: String },

    /// A referenced entity does not exist in the store
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// A consumer with the same scope and name already exists
    #[error("Consumer {name} already exists")]
    ConsumerExists { name: String },

    /// Configuration errors (invalid config, missing cluster, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Kubernetes ingress operation failed
    #[error("Ingress error: {message}")]
    Ingress { message: String },

    /// The gateway backend answered with an unexpected status
    #[error("{operation} failed: code[{status}] msg[{body}]")]
    Backend {
        operation: String,
        status: u16,
        body: String,
    },

    /// HTTP client errors when talking to the gateway backend
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// I/O errors (file operations)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration and manifest files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Internal errors for unclassified adapter/store failures
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ControlPlaneError {
    pub fn malformed_path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::MalformedPathTemplate {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_request<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found<K: Into<String>, I: Into<String>>(kind: K, id: I) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn ingress<S: Into<String>>(message: S) -> Self {
        Self::Ingress {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn backend<O: Into<String>, B: Into<String>>(operation: O, status: StatusCode, body: B) -> Self {
        Self::Backend {
            operation: operation.into(),
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// True when the error means the remote or stored object is already gone.
    ///
    /// Delete paths treat this as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Backend { status, .. } => *status == StatusCode::NOT_FOUND.as_u16(),
            _ => false,
        }
    }

    /// Errors raised before any remote call was made
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MalformedPathTemplate { .. }
                | Self::UnboundRewriteVariable { .. }
                | Self::InvalidRequest { .. }
        )
    }

    /// Re-wrap raw transport/backend failures into a step-specific kind.
    ///
    /// Typed errors (conflicts, version gating, validation) pass through unchanged
    /// so callers still see the precise cause.
    pub fn classify<F>(self, wrap: F) -> Self
    where
        F: FnOnce(String) -> Self,
    {
        match self {
            Self::Backend { .. }
            | Self::HttpClient { .. }
            | Self::Json { .. }
            | Self::Internal { .. } => wrap(self.to_string()),
            other => other,
        }
    }

    /// HTTP status a handler layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedPathTemplate { .. } => StatusCode::BAD_REQUEST,
            Self::UnboundRewriteVariable { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::RouteConflict { .. } => StatusCode::CONFLICT,
            Self::ConsumerExists { .. } => StatusCode::CONFLICT,
            Self::RouteInUse { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnknownGatewayProvider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendVersionUnsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceProvisionFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::RoutePublishFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::PluginApplyFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Backend { .. } => StatusCode::BAD_GATEWAY,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Ingress { .. } => StatusCode::BAD_GATEWAY,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedPathTemplate { .. } => "malformed_path_template",
            Self::UnboundRewriteVariable { .. } => "unbound_rewrite_variable",
            Self::RouteConflict { .. } => "route_conflict",
            Self::RouteInUse { .. } => "route_in_use",
            Self::UnknownGatewayProvider { .. } => "unknown_gateway_provider",
            Self::BackendVersionUnsupported { .. } => "backend_version_unsupported",
            Self::ServiceProvisionFailed { .. } => "service_provision_failed",
            Self::RoutePublishFailed { .. } => "route_publish_failed",
            Self::PluginApplyFailed { .. } => "plugin_apply_failed",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::ConsumerExists { .. } => "consumer_exists",
            Self::Configuration { .. } => "configuration_error",
            Self::Ingress { .. } => "ingress_error",
            Self::Backend { .. } => "backend_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<std::io::Error> for ControlPlaneError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ControlPlaneError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

impl From<kube::Error> for ControlPlaneError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound {
                kind: "kubernetes object".to_string(),
                id: resp.message.clone(),
            },
            _ => Self::Ingress {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ControlPlaneError::malformed_path("/a/{", "unterminated").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ControlPlaneError::RouteConflict {
                path: "/a".into(),
                method: "GET".into(),
                existing_id: "r1".into(),
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ControlPlaneError::not_found("route", "x").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(ControlPlaneError::not_found("route", "x").is_not_found());
        assert!(ControlPlaneError::backend("DeleteRoute", StatusCode::NOT_FOUND, "").is_not_found());
        assert!(!ControlPlaneError::backend("DeleteRoute", StatusCode::BAD_REQUEST, "").is_not_found());
    }

    #[test]
    fn test_classify_wraps_only_raw_failures() {
        let raw = ControlPlaneError::backend("CreateOrUpdateService", StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let wrapped = raw.classify(|message| ControlPlaneError::ServiceProvisionFailed { message });
        assert_eq!(wrapped.error_type(), "service_provision_failed");
        assert!(wrapped.to_string().contains("boom"));

        let typed = ControlPlaneError::BackendVersionUnsupported {
            plugin: "path-variable".into(),
            version: "0.14.1".into(),
        };
        let passed = typed.clone().classify(|message| ControlPlaneError::PluginApplyFailed {
            plugin: "path-variable".into(),
            message,
        });
        assert_eq!(passed, typed);
    }

    #[test]
    fn test_validation_kinds() {
        assert!(ControlPlaneError::invalid_request("redirect_address", "required").is_validation());
        assert!(ControlPlaneError::UnboundRewriteVariable {
            variable: "id".into(),
            path: "/a".into()
        }
        .is_validation());
        assert!(!ControlPlaneError::internal("x").is_validation());
    }
}
