//! Versioned cache names.

use std::fmt;

/// A versioned, named cache store instance (`draw-party-v1`).
///
/// The prefix identifies every cache this agent owns; the version tells the
/// current generation apart from stale ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation {
    prefix: String,
    version: String,
    name: String,
}

impl Generation {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let version = version.into();
        let name = format!("{prefix}-{version}");
        Self {
            prefix,
            version,
            name,
        }
    }

    /// Full cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether `cache_name` belongs to this agent (any generation).
    ///
    /// Versions never contain `-`, so `draw-party-admin-v1` belongs to a
    /// sibling agent, not to `draw-party`.
    pub fn owns(&self, cache_name: &str) -> bool {
        cache_name
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|version| !version.is_empty() && !version.contains('-'))
    }

    /// Whether `cache_name` is an owned generation other than this one.
    pub fn is_stale(&self, cache_name: &str) -> bool {
        self.owns(cache_name) && cache_name != self.name
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
