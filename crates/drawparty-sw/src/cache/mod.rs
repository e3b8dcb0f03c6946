//! Cache storage: named caches mapping request identity to response snapshots.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache ("draw-party-v1")
//!             └── RequestKey (method + URL) → CacheEntry
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use drawparty_net::{Request, Response, ResponseType};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SwError, SwResult};

mod disk;
mod memory;

pub use disk::DiskCacheStorage;
pub use memory::{Cache, MemoryCacheStorage};

/// Identity of a cached request: method plus URL (query kept, fragment dropped).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Final response URL.
    pub response_url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, duplicates kept.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response. The body is copied, so the response stays readable.
    pub fn from_response(key: RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            key,
            response_url: response.url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> SwResult<Response> {
        let url = Url::parse(&self.response_url)?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| SwError::cache(format!("bad status in {}: {e}", self.key)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        let mut response = Response::new(url, status, Bytes::from(self.body.clone()))
            .with_type(ResponseType::Basic);
        response.headers = headers;
        response.from_cache = true;
        Ok(response)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Name-addressed cache storage owned by the host runtime.
///
/// Every operation is a suspension point. Implementations serialize access to
/// the same key; there are no multi-key transactions.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if absent.
    async fn open(&self, name: &str) -> SwResult<()>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> SwResult<bool>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> SwResult<bool>;

    /// All cache names, sorted.
    async fn keys(&self) -> SwResult<Vec<String>>;

    /// Look up an entry in one cache. A missing cache is a miss.
    async fn match_request(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>>;

    /// Store an entry, replacing any entry with the same key. Creates the cache if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()>;

    /// Keys of all entries in one cache, sorted.
    async fn entry_keys(&self, name: &str) -> SwResult<Vec<RequestKey>>;
}
