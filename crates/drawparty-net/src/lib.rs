//! # Draw Party Net
//!
//! Request/response model and network access for the Draw Party offline agent.
//!
//! ## Design Goals
//!
//! 1. **Fetch seam**: the agent only talks to the network through [`Fetcher`],
//!    so hosts and tests can substitute their own transport
//! 2. **Response typing**: every response carries a [`ResponseType`] so the
//!    agent can tell same-origin results from opaque ones
//! 3. **Pass-through rules**: [`Denylist`] decides which URLs are never
//!    intercepted

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

#[cfg(any(test, feature = "test-util"))]
pub mod canned;
pub mod intercept;

#[cfg(any(test, feature = "test-util"))]
pub use canned::CannedFetcher;
pub use intercept::{Denylist, PatternType, UrlPattern};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether the failure means no response could be obtained at all.
    pub fn is_offline(&self) -> bool {
        match self {
            NetError::Offline(_) | NetError::Timeout(_) => true,
            NetError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by the intercepting agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    /// Same-origin only.
    SameOrigin,
    /// Cross-origin without CORS; responses are opaque.
    NoCors,
    /// Cross-origin with CORS.
    #[default]
    Cors,
}

/// Outgoing request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a navigation (page load) request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this request loads a full page.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// How a response relates to the origin that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response with full access.
    #[default]
    Basic,
    /// Cross-origin response allowed by CORS.
    Cors,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
    /// Unfollowed redirect.
    OpaqueRedirect,
}

impl ResponseType {
    /// Classify a response by comparing its final URL with the client origin.
    pub fn classify(origin: &Url, final_url: &Url, mode: RequestMode) -> Self {
        if origin.origin() == final_url.origin() {
            ResponseType::Basic
        } else if mode == RequestMode::Cors {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ResponseType::Opaque | ResponseType::OpaqueRedirect)
    }
}

/// HTTP response.
///
/// The body is an immutable [`Bytes`] buffer, so a clone is an independent,
/// fully readable copy.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    /// Served from an agent cache rather than the network.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Create a same-origin response.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            redirected: false,
            from_cache: false,
            body: body.into(),
        }
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed content type, if any.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can turn a request into a network response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Network loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Origin of the controlled application; same-origin responses are `Basic`.
    /// When unset every response is classified `Opaque`.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("DrawParty-Agent/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            origin: None,
        }
    }
}

/// [`Fetcher`] backed by a reqwest client.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = ?config.origin.as_ref().map(Url::as_str), "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        // Without a known origin nothing can be shown to be same-origin.
        let response_type = match self.config.origin {
            Some(ref origin) => ResponseType::classify(origin, &url, request.mode),
            None => ResponseType::Opaque,
        };
        let redirected = url != request.url;

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            response_type,
            redirected,
            from_cache: false,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigate_request() {
        let request = Request::navigate(Url::parse("https://example.com/").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_response_type_classify() {
        let origin = Url::parse("https://draw.party/").unwrap();
        let same = Url::parse("https://draw.party/app.js").unwrap();
        let other = Url::parse("https://cdn.example.com/lib.js").unwrap();

        assert_eq!(
            ResponseType::classify(&origin, &same, RequestMode::NoCors),
            ResponseType::Basic
        );
        assert_eq!(
            ResponseType::classify(&origin, &other, RequestMode::Cors),
            ResponseType::Cors
        );
        assert!(ResponseType::classify(&origin, &other, RequestMode::NoCors).is_opaque());
    }

    #[test]
    fn test_response_clone_is_independent() {
        let url = Url::parse("https://draw.party/index.html").unwrap();
        let original = Response::new(url, StatusCode::OK, "<html></html>");
        let copy = original.clone();

        assert_eq!(original.bytes(), Bytes::from_static(b"<html></html>"));
        assert_eq!(copy.text().unwrap(), "<html></html>");
    }

    #[test]
    fn test_offline_classification() {
        assert!(NetError::Offline("down".into()).is_offline());
        assert!(NetError::Timeout(Duration::from_secs(1)).is_offline());
        assert!(!NetError::InvalidUrl("x".into()).is_offline());
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("DrawParty-Agent/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_http_fetcher_same_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<h1>Draw Party</h1>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(LoaderConfig {
            origin: Some(origin.clone()),
            ..Default::default()
        })
        .unwrap();

        let request = Request::get(origin.join("/index.html").unwrap());
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.content_type(), Some(mime::TEXT_HTML));
        assert!(!response.from_cache);
        assert_eq!(response.text().unwrap(), "<h1>Draw Party</h1>");
    }

    #[tokio::test]
    async fn test_http_fetcher_cross_origin_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig {
            origin: Some(Url::parse("https://draw.party/").unwrap()),
            ..Default::default()
        })
        .unwrap();

        let url = Url::parse(&server.uri()).unwrap().join("/lib.js").unwrap();
        let request = Request::get(url).mode(RequestMode::NoCors);
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.response_type, ResponseType::Opaque);
    }

    #[tokio::test]
    async fn test_http_fetcher_without_origin_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("draw()"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap().join("/app.js").unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Opaque);
    }

    #[tokio::test]
    async fn test_http_fetcher_error_status_is_not_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap().join("/missing").unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }
}
