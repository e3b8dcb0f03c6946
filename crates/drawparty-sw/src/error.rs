//! Error types for the offline agent.

use drawparty_net::NetError;
use thiserror::Error;

/// Result type alias for agent operations.
pub type SwResult<T> = Result<T, SwError>;

/// Errors that can occur in agent operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl SwError {
    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::CacheError(msg.into())
    }

    /// Create a state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::StateError(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from the network rather than the agent.
    pub fn is_network(&self) -> bool {
        matches!(self, SwError::Network(_))
    }
}
