//! # Path Template Compiler
//!
//! Parses route paths such as `/orders/{id}/items/{sku:[A-Z0-9]+}` into
//! literal segments and placeholders, builds the named-capture regex the
//! gateway backend matches on, and checks that a backend rewrite path only
//! uses variables the public route path declares.
//!
//! ## Key Features
//! - Single left-to-right scan with two states; malformed templates fail fast
//! - Per-variable regex override with `{name:regex}` (default `[^/]+`)
//! - Rewrite-path alignment between the route path and the redirect target
//! - Path normalization shared by provisioning and conflict checks

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::{ControlPlaneError, ControlPlaneResult};

/// Regex used for a placeholder without an explicit pattern
pub const DEFAULT_VARIABLE_REGEX: &str = "[^/]+";

/// One piece of a parsed path template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Literal(String),
    /// Raw placeholder text between the braces, e.g. `id` or `id:[0-9]+`
    Placeholder(String),
}

impl Segment {
    fn placeholder_parts(raw: &str) -> (&str, Option<&str>) {
        match raw.find(':') {
            Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
            None => (raw, None),
        }
    }
}

/// A path split into literal segments and placeholders
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Literal,
    Variable,
}

impl PathTemplate {
    /// Parse `path` into segments.
    ///
    /// `}` outside a variable, `{` inside one, an empty `{}` or an unterminated
    /// variable are all rejected with [`ControlPlaneError::MalformedPathTemplate`].
    pub fn split(path: &str) -> ControlPlaneResult<Self> {
        let mut state = ScanState::Literal;
        let mut segments = Vec::new();
        let mut buf = String::new();

        for (pos, c) in path.char_indices() {
            match (state, c) {
                (ScanState::Literal, '{') => {
                    if !buf.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut buf)));
                    }
                    state = ScanState::Variable;
                }
                (ScanState::Literal, '}') => {
                    return Err(ControlPlaneError::malformed_path(
                        path,
                        format!("unexpected '}}' at offset {}", pos),
                    ));
                }
                (ScanState::Variable, '{') => {
                    return Err(ControlPlaneError::malformed_path(
                        path,
                        format!("nested '{{' at offset {}", pos),
                    ));
                }
                (ScanState::Variable, '}') => {
                    if buf.is_empty() {
                        return Err(ControlPlaneError::malformed_path(
                            path,
                            format!("empty variable at offset {}", pos),
                        ));
                    }
                    segments.push(Segment::Placeholder(std::mem::take(&mut buf)));
                    state = ScanState::Literal;
                }
                (_, c) => buf.push(c),
            }
        }

        if state == ScanState::Variable {
            return Err(ControlPlaneError::malformed_path(path, "unterminated variable"));
        }
        if !buf.is_empty() {
            segments.push(Segment::Literal(buf));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable names in order of appearance, without regex suffixes
    pub fn variables(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(raw) => Some(Segment::placeholder_parts(raw).0),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn has_variables(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Placeholder(_)))
    }

    /// Rebuild the original template text
    pub fn join(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(raw) => format!("{{{}}}", raw),
            })
            .collect()
    }

    /// Number of literal characters, used as the backend's regex priority
    pub fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.chars().count(),
                Segment::Placeholder(_) => 0,
            })
            .sum()
    }

    /// Replace every placeholder with a named capture group `(?<name>regex)`
    pub fn build_regex(&self) -> ControlPlaneResult<String> {
        let mut pattern = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(text),
                Segment::Placeholder(raw) => {
                    let (name, custom) = Segment::placeholder_parts(raw);
                    if name.is_empty() {
                        return Err(ControlPlaneError::malformed_path(
                            self.join(),
                            format!("variable '{}' has no name", raw),
                        ));
                    }
                    let regex = custom.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_VARIABLE_REGEX);
                    pattern.push_str(&format!("(?<{}>{})", name, regex));
                }
            }
        }

        Regex::new(&pattern)
            .map_err(|e| ControlPlaneError::malformed_path(self.join(), format!("invalid regex: {}", e)))?;
        Ok(pattern)
    }

    /// Template with every placeholder reduced to `{name}`
    pub fn rewrite_template(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(raw) => format!("{{{}}}", Segment::placeholder_parts(raw).0),
            })
            .collect()
    }
}

/// Check that `target` only uses variables bound by `route` and build the rewrite path
pub fn reconcile(route: &PathTemplate, target: &PathTemplate) -> ControlPlaneResult<String> {
    let bound = route.variables();
    if let Some(missing) = target.variables().into_iter().find(|v| !bound.contains(v)) {
        return Err(ControlPlaneError::UnboundRewriteVariable {
            variable: missing.to_string(),
            path: route.join(),
        });
    }
    Ok(target.rewrite_template())
}

/// Collapse repeated slashes, strip one trailing slash, and map the empty path to `/`
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Result of aligning a public route path with its redirect target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAlignment {
    /// Normalized template as stored on the route row
    pub route_path: String,
    /// Path sent to the backend route: the capture regex for templated paths
    pub backend_path: String,
    pub regex_path: bool,
    /// Address the upstream service is created with
    pub service_address: String,
    /// Address stored on the route row, including the rewrite template
    pub stored_address: String,
    /// Rewrite template when the target path carries variables
    pub rewrite_path: Option<String>,
}

/// Normalize and compile `route_path`, and split `redirect` into the service
/// base address and rewrite template when the redirect path has variables.
pub fn align(route_path: &str, redirect: &str) -> ControlPlaneResult<PathAlignment> {
    let normalized = normalize(route_path);
    let scheme_end = redirect
        .find("://")
        .ok_or_else(|| ControlPlaneError::invalid_request("redirect_address", format!("'{}' has no scheme", redirect)))?;
    let authority_start = scheme_end + 3;
    let (base, target_path) = match redirect[authority_start..].find('/') {
        Some(idx) => redirect.split_at(authority_start + idx),
        None => (redirect, ""),
    };

    let route = PathTemplate::split(&normalized)?;
    let target = PathTemplate::split(target_path)?;

    let (backend_path, regex_path) = if route.has_variables() {
        (route.build_regex()?, true)
    } else {
        (normalized.clone(), false)
    };

    if target.has_variables() {
        let rewrite = reconcile(&route, &target)?;
        return Ok(PathAlignment {
            route_path: normalized,
            backend_path,
            regex_path,
            service_address: base.to_string(),
            stored_address: format!("{}{}", base, rewrite),
            rewrite_path: Some(rewrite),
        });
    }

    Ok(PathAlignment {
        route_path: normalized,
        backend_path,
        regex_path,
        service_address: redirect.to_string(),
        stored_address: redirect.to_string(),
        rewrite_path: None,
    })
}

/// Join a redirect address and path with exactly one slash between them
pub fn join_redirect(address: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return address.to_string();
    }
    format!("{}/{}", address.trim_end_matches('/'), path)
}
