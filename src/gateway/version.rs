//! Backend version parsing and version-dependent request adjustment.

use std::fmt;

/// Semantic version reported by a gateway backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GatewayVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GatewayVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse strings like `2.8.1`, `0.14.1-enterprise` or `1.3`.
    ///
    /// Returns `None` when the major component is not numeric.
    pub fn parse(raw: &str) -> Option<Self> {
        let core = raw
            .trim()
            .trim_start_matches('v')
            .split(|c: char| c == '-' || c == '+' || c == ' ')
            .next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self { major, minor, patch })
    }

    /// Backends from 2.0 need an explicit `path_handling` and regex priority
    pub fn uses_path_handling(&self) -> bool {
        self.major >= 2
    }

    pub fn supports_regex_priority(&self) -> bool {
        self.major >= 1
    }
}

impl fmt::Display for GatewayVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
