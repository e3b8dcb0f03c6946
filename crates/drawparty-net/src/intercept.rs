//! URL patterns deciding which requests the agent leaves alone.

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Substring anywhere in the raw URL, query included.
    Contains,
    /// Host equals the pattern or is a subdomain of it.
    Host,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::with_type(PatternType::Exact, url)
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::with_type(PatternType::Prefix, prefix)
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self::with_type(PatternType::Suffix, suffix)
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::with_type(PatternType::Contains, substring)
    }

    /// Create a host pattern (`example.com` also matches `a.example.com`).
    pub fn host(domain: &str) -> Self {
        Self::with_type(PatternType::Host, domain)
    }

    fn with_type(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::Suffix => url_str.ends_with(&self.pattern),
            PatternType::Contains => url_str.contains(&self.pattern),
            PatternType::Host => match url.host_str() {
                Some(host) => {
                    let domain = self.pattern.trim_start_matches('.');
                    host == domain
                        || host
                            .strip_suffix(domain)
                            .is_some_and(|rest| rest.ends_with('.'))
                }
                None => false,
            },
        }
    }
}

/// URLs that must always reach the network untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Denylist {
    patterns: Vec<UrlPattern>,
}

impl Denylist {
    /// Create an empty denylist.
    pub fn new() -> Self {
        Self::default()
    }

    /// The real-time relay endpoints used by the game: the self-hosted relay,
    /// its public SaaS domain, and the hosting platform.
    pub fn relay_defaults() -> Self {
        Self {
            patterns: vec![
                UrlPattern::contains("peerjs-server"),
                UrlPattern::contains("peerjs.com"),
                UrlPattern::contains("herokuapp.com"),
            ],
        }
    }

    /// Add a pattern.
    pub fn push(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Return the first pattern matching `url`.
    pub fn find(&self, url: &Url) -> Option<&UrlPattern> {
        let hit = self.patterns.iter().find(|p| p.matches(url));
        if let Some(pattern) = hit {
            trace!(url = %url, pattern = %pattern.pattern, "Denylist matched");
        }
        hit
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.find(url).is_some()
    }
}

impl FromIterator<UrlPattern> for Denylist {
    fn from_iter<I: IntoIterator<Item = UrlPattern>>(iter: I) -> Self {
        Self {
            patterns: iter.into_iter().collect(),
        }
    }
}
