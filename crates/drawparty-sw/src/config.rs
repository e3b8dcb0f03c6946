//! Agent configuration

use std::path::Path;
use std::time::Duration;

use drawparty_common::{LogConfig, LogFormat};
use drawparty_net::{Denylist, LoaderConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SwError, SwResult};
use crate::generation::Generation;

/// Offline agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Scope URL of the controlled application
    pub scope: String,

    /// Prefix shared by every cache generation this agent owns
    pub cache_prefix: String,

    /// Version of the current generation
    pub cache_version: String,

    /// Paths pre-cached at install, relative to the scope
    pub manifest: Vec<String>,

    /// Document served to offline navigations
    pub offline_fallback: String,

    /// URLs that are never intercepted
    pub denylist: Denylist,

    /// Background sync tag that triggers a reconnect broadcast
    pub reconnect_tag: String,

    /// Ask the host to activate right after install
    pub skip_waiting_on_install: bool,

    /// Take control of open clients right after activation
    pub claim_on_activate: bool,

    /// Push notification rendering
    pub notification: NotificationConfig,

    /// Network settings
    pub network: NetworkConfig,

    /// Logging settings for the embedding host
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification icon
    pub icon: String,

    /// Notification badge
    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Label of the "join" action
    pub join_title: String,

    /// Label of the "dismiss" action
    pub dismiss_title: String,

    /// Page opened by the "join" action
    pub open_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent override
    pub user_agent: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed
    pub max_redirects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, compact, json)
    pub format: String,

    /// Optional `EnvFilter` directive string
    pub filter: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:8080/".to_string(),
            cache_prefix: "draw-party".to_string(),
            cache_version: "v1".to_string(),
            manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            offline_fallback: "/index.html".to_string(),
            denylist: Denylist::relay_defaults(),
            reconnect_tag: "reconnect-game".to_string(),
            skip_waiting_on_install: true,
            claim_on_activate: true,
            notification: NotificationConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/icon-192.png".to_string(),
            badge: "/icon-192.png".to_string(),
            vibrate: vec![200, 100, 200],
            join_title: "Join Game".to_string(),
            dismiss_title: "Dismiss".to_string(),
            open_url: "/".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            filter: None,
        }
    }
}

impl AgentConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> SwResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> SwResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Same configuration with a different cache version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Check the configuration for values the agent cannot work with.
    pub fn validate(&self) -> SwResult<()> {
        let scope = self.scope_url()?;
        if self.cache_prefix.trim().is_empty() {
            return Err(SwError::config("cache_prefix must not be empty"));
        }
        if self.cache_version.trim().is_empty() {
            return Err(SwError::config("cache_version must not be empty"));
        }
        if self.cache_version.contains('-') {
            return Err(SwError::config(format!(
                "cache_version {:?} must not contain '-'",
                self.cache_version
            )));
        }
        if self.network.timeout_secs == 0 {
            return Err(SwError::config("network.timeout_secs must be at least 1"));
        }
        for path in self.manifest.iter().chain([&self.offline_fallback]) {
            scope
                .join(path)
                .map_err(|e| SwError::config(format!("cannot resolve {path:?}: {e}")))?;
        }
        self.logging.log_config()?;
        Ok(())
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> SwResult<Url> {
        Url::parse(&self.scope)
            .map_err(|e| SwError::config(format!("invalid scope {:?}: {e}", self.scope)))
    }

    /// The cache generation described by this configuration.
    pub fn generation(&self) -> Generation {
        Generation::new(&self.cache_prefix, &self.cache_version)
    }

    /// Manifest entries resolved against the scope, in order.
    pub fn manifest_urls(&self) -> SwResult<Vec<Url>> {
        let scope = self.scope_url()?;
        self.manifest
            .iter()
            .map(|path| scope.join(path).map_err(SwError::from))
            .collect()
    }

    /// Offline fallback document resolved against the scope.
    pub fn fallback_url(&self) -> SwResult<Url> {
        Ok(self.scope_url()?.join(&self.offline_fallback)?)
    }

    /// Loader settings for an HTTP fetcher serving this scope.
    pub fn loader_config(&self) -> SwResult<LoaderConfig> {
        let defaults = LoaderConfig::default();
        Ok(LoaderConfig {
            user_agent: self
                .network
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            default_timeout: Duration::from_secs(self.network.timeout_secs),
            max_redirects: self.network.max_redirects,
            origin: Some(self.scope_url()?),
        })
    }
}

impl LoggingConfig {
    /// Convert to the subscriber configuration.
    pub fn log_config(&self) -> SwResult<LogConfig> {
        let level = self
            .level
            .parse()
            .map_err(|_| SwError::config(format!("unknown log level: {}", self.level)))?;
        let format: LogFormat = self.format.parse().map_err(SwError::config)?;
        Ok(LogConfig {
            level,
            format,
            filter: self.filter.clone(),
            ..LogConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation().name(), "draw-party-v1");
        assert_eq!(config.reconnect_tag, "reconnect-game");
        assert_eq!(config.denylist.patterns().len(), 3);
    }

    #[test]
    fn test_manifest_urls_resolve_against_scope() {
        let config = AgentConfig {
            scope: "https://draw.party/app/".to_string(),
            ..Default::default()
        };
        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://draw.party/");
        assert_eq!(urls[1].as_str(), "https://draw.party/index.html");
        assert_eq!(config.fallback_url().unwrap().as_str(), "https://draw.party/index.html");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AgentConfig::from_json_str(
            r#"{"cache_version":"v7","denylist":[{"type":"host","pattern":"peerjs.com"}]}"#,
        )
        .unwrap();
        assert_eq!(config.generation().name(), "draw-party-v7");
        assert_eq!(config.manifest.len(), 3);
        assert_eq!(config.denylist.patterns().len(), 1);
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let err = AgentConfig::from_json_str(r#"{"scope":"not a url"}"#).unwrap_err();
        assert!(matches!(err, SwError::Config(_)));
    }

    #[test]
    fn test_empty_version_rejected() {
        let config = AgentConfig::default().with_version(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dashed_version_rejected() {
        let config = AgentConfig::default().with_version("admin-v1");
        assert!(matches!(config.validate(), Err(SwError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = AgentConfig::from_json_str(r#"{"network":{"timeout_secs":0}}"#).unwrap_err();
        assert!(matches!(err, SwError::Config(_)));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = AgentConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_conversion() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
            filter: Some("drawparty_sw=trace".to_string()),
        };
        let log_config = logging.log_config().unwrap();
        assert_eq!(log_config.level, tracing::Level::DEBUG);
        assert_eq!(log_config.format, LogFormat::Json);
    }

    #[test]
    fn test_loader_config_uses_scope_origin() {
        let config = AgentConfig {
            scope: "https://draw.party/".to_string(),
            network: NetworkConfig {
                timeout_secs: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        let loader = config.loader_config().unwrap();
        assert_eq!(loader.origin.unwrap().as_str(), "https://draw.party/");
        assert_eq!(loader.default_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache_prefix":"sketch","reconnect_tag":"rejoin"}}"#).unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.generation().name(), "sketch-v1");
        assert_eq!(config.reconnect_tag, "rejoin");
    }
}
