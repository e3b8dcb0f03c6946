//! A [`Fetcher`] that answers from a fixed table, for offline simulation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use http::StatusCode;
use tracing::trace;

use crate::{Fetcher, NetError, Request, Response};

/// Serves pre-registered responses keyed by URL.
///
/// Unknown URLs get a 404. While offline every fetch fails with
/// [`NetError::Offline`]. Every call is counted, online or not.
#[derive(Debug)]
pub struct CannedFetcher {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl CannedFetcher {
    /// Create an online fetcher with no routes.
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Serve `response` for its own URL.
    pub fn insert(&self, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(response.url.to_string(), response);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs fetched, in order.
    pub fn requested(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for CannedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.url.to_string());

        if !self.is_online() {
            return Err(NetError::Offline(format!("offline: {}", request.url)));
        }

        let found = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url.as_str())
            .cloned();
        trace!(url = %request.url, hit = found.is_some(), "Canned fetch");

        Ok(found.unwrap_or_else(|| Response::new(request.url.clone(), StatusCode::NOT_FOUND, "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_serves_registered_response() {
        let fetcher = CannedFetcher::new();
        fetcher.insert(Response::new(url("https://draw.party/"), StatusCode::OK, "root"));

        let response = fetcher.fetch(&Request::get(url("https://draw.party/"))).await.unwrap();
        assert_eq!(response.text().unwrap(), "root");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_url_is_404() {
        let fetcher = CannedFetcher::new();
        let response = fetcher
            .fetch(&Request::get(url("https://draw.party/missing")))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_offline_fails_and_counts() {
        let fetcher = CannedFetcher::new();
        fetcher.insert(Response::new(url("https://draw.party/"), StatusCode::OK, "root"));
        fetcher.set_online(false);

        let err = fetcher
            .fetch(&Request::get(url("https://draw.party/")))
            .await
            .unwrap_err();
        assert!(err.is_offline());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.requested(), vec!["https://draw.party/".to_string()]);
    }
}
