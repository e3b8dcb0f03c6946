//! End-to-end tests for the offline agent, driven through a registration the
//! way a host would drive it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use drawparty_net::{CannedFetcher, Request, Response, ResponseType};
use drawparty_sw::{
    AgentConfig, CacheEntry, CacheStorage, ClientMessage, DiskCacheStorage, FetchOutcome,
    MemoryCacheStorage, NotificationClick, PassThroughReason, RequestKey,
    ServiceWorkerRegistration, SwError, SwResult,
};
use http::StatusCode;
use url::Url;

const SCOPE: &str = "https://draw.party/";

fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

fn config(version: &str) -> AgentConfig {
    AgentConfig {
        scope: SCOPE.to_string(),
        ..Default::default()
    }
    .with_version(version)
}

/// A fetcher serving the full app shell.
fn app_shell() -> Arc<CannedFetcher> {
    let fetcher = Arc::new(CannedFetcher::new());
    fetcher
        .insert(Response::new(url("/"), StatusCode::OK, "<html>root</html>"))
        .insert(Response::new(url("/index.html"), StatusCode::OK, "<html>index</html>"))
        .insert(Response::new(url("/manifest.json"), StatusCode::OK, "{}"));
    fetcher
}

struct Harness {
    registration: ServiceWorkerRegistration,
    caches: Arc<MemoryCacheStorage>,
    fetcher: Arc<CannedFetcher>,
}

async fn installed(version: &str) -> Harness {
    let caches = Arc::new(MemoryCacheStorage::new());
    let fetcher = app_shell();
    let mut registration =
        ServiceWorkerRegistration::new(url("/"), caches.clone(), fetcher.clone());
    registration.install(config(version)).await.unwrap();
    Harness {
        registration,
        caches,
        fetcher,
    }
}

fn respond(outcome: FetchOutcome) -> Response {
    match outcome {
        FetchOutcome::Respond(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reinstall_is_idempotent() {
    let mut h = installed("v1").await;
    let before = h.caches.cache("draw-party-v1").await.unwrap().keys();

    h.registration.install(config("v1")).await.unwrap();

    let after = h.caches.cache("draw-party-v1").await.unwrap().keys();
    assert_eq!(before, after);
    assert_eq!(after.len(), 3);
    assert_eq!(h.caches.keys().await.unwrap(), vec!["draw-party-v1".to_string()]);
}

#[tokio::test]
async fn test_new_generation_replaces_old() {
    let mut h = installed("v1").await;
    h.caches.open("unrelated-v9").await.unwrap();

    h.registration.install(config("v2")).await.unwrap();

    assert_eq!(
        h.caches.keys().await.unwrap(),
        vec!["draw-party-v2".to_string(), "unrelated-v9".to_string()]
    );
    assert_eq!(
        h.registration.active_generation().unwrap().name(),
        "draw-party-v2"
    );
}

#[tokio::test]
async fn test_cached_shell_served_without_network() {
    let h = installed("v1").await;
    let after_install = h.fetcher.calls();

    let response = respond(
        h.registration
            .fetch(Request::navigate(url("/index.html")))
            .await
            .unwrap(),
    );

    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "<html>index</html>");
    assert_eq!(h.fetcher.calls(), after_install);
}

#[tokio::test]
async fn test_network_response_fills_cache() {
    let h = installed("v1").await;
    h.fetcher
        .insert(Response::new(url("/draw.js"), StatusCode::OK, "draw()"));

    let first = respond(h.registration.fetch(Request::get(url("/draw.js"))).await.unwrap());
    assert!(!first.from_cache);
    assert_eq!(first.text().unwrap(), "draw()");
    assert_eq!(h.registration.settle().await, 1);

    h.fetcher.set_online(false);
    let second = respond(h.registration.fetch(Request::get(url("/draw.js"))).await.unwrap());
    assert!(second.from_cache);
    assert_eq!(second.text().unwrap(), "draw()");
}

#[tokio::test]
async fn test_opaque_responses_never_cached() {
    let h = installed("v1").await;
    let font = Url::parse("https://fonts.example/draw.woff2").unwrap();
    h.fetcher.insert(
        Response::new(font.clone(), StatusCode::OK, "font").with_type(ResponseType::Opaque),
    );

    respond(h.registration.fetch(Request::get(font.clone())).await.unwrap());
    h.registration.settle().await;

    let stored = h
        .caches
        .match_request("draw-party-v1", &RequestKey::get(&font))
        .await
        .unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn test_writes_and_relay_traffic_bypass_agent() {
    let h = installed("v1").await;
    let calls = h.fetcher.calls();

    let post = h
        .registration
        .fetch(Request::post(url("/api/stroke"), "{}".into()))
        .await
        .unwrap();
    assert!(matches!(
        post,
        FetchOutcome::PassThrough(PassThroughReason::NonGetMethod)
    ));

    for relay in [
        "https://0.peerjs.com/peerjs/id",
        "https://draw-peerjs-server.herokuapp.com/peerjs",
    ] {
        let outcome = h
            .registration
            .fetch(Request::get(Url::parse(relay).unwrap()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::PassThrough(PassThroughReason::Denylisted)
        ));
    }

    assert_eq!(h.fetcher.calls(), calls);
}

#[tokio::test]
async fn test_offline_navigation_falls_back_to_shell() {
    let h = installed("v1").await;
    h.fetcher.set_online(false);

    let page = respond(
        h.registration
            .fetch(Request::navigate(url("/room/abc")))
            .await
            .unwrap(),
    );
    assert_eq!(page.text().unwrap(), "<html>index</html>");

    let script = h.registration.fetch(Request::get(url("/room.js"))).await;
    assert!(matches!(script, Err(SwError::Network(_))));
}

#[tokio::test]
async fn test_reconnect_sync_reaches_open_pages() {
    let h = installed("v1").await;
    let mut page = h.registration.connect_client(url("/room/abc")).await;

    h.registration.sync("reconnect-game").await.unwrap();
    h.registration.sync("unrelated").await.unwrap();

    assert_eq!(page.messages.try_recv().unwrap(), ClientMessage::ReconnectGame);
    assert!(page.messages.try_recv().is_err());
}

#[tokio::test]
async fn test_push_join_opens_game() {
    let h = installed("v1").await;
    h.registration
        .push(Some(r#"{"title":"Your turn","body":"Draw a house"}"#.into()))
        .await
        .unwrap();

    let id = {
        let notifications = h.registration.host().notifications.read().await;
        let shown = &notifications.active()[0];
        assert_eq!(shown.title, "Your turn");
        shown.id
    };

    let window = h
        .registration
        .notification_click(NotificationClick {
            notification_id: id,
            action: Some("join".to_string()),
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(window.client.url, url("/"));
    assert!(h.registration.host().notifications.read().await.active().is_empty());
}

#[tokio::test]
async fn test_disk_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = app_shell();

    {
        let caches = Arc::new(DiskCacheStorage::new(dir.path()));
        let mut registration = ServiceWorkerRegistration::new(url("/"), caches, fetcher.clone());
        registration.install(config("v1")).await.unwrap();
    }

    fetcher.set_online(false);
    let caches = Arc::new(DiskCacheStorage::new(dir.path()));
    let mut registration = ServiceWorkerRegistration::new(url("/"), caches, fetcher);
    registration.install(config("v1")).await.unwrap();

    let response = respond(registration.fetch(Request::get(url("/"))).await.unwrap());
    assert_eq!(response.text().unwrap(), "<html>root</html>");
}

/// Memory storage whose writes take a long time to commit.
struct SlowWrites {
    inner: MemoryCacheStorage,
    delay: Duration,
}

#[async_trait]
impl CacheStorage for SlowWrites {
    async fn open(&self, name: &str) -> SwResult<()> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn match_request(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>> {
        self.inner.match_request(name, key).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(name, entry).await
    }

    async fn entry_keys(&self, name: &str) -> SwResult<Vec<RequestKey>> {
        self.inner.entry_keys(name).await
    }
}

#[tokio::test]
async fn test_response_not_held_back_by_cache_write() {
    let caches = Arc::new(SlowWrites {
        inner: MemoryCacheStorage::new(),
        delay: Duration::from_secs(1),
    });
    let fetcher = Arc::new(CannedFetcher::new());
    fetcher.insert(Response::new(url("/app.js"), StatusCode::OK, "app()"));
    let mut registration =
        ServiceWorkerRegistration::new(url("/"), caches.clone(), fetcher.clone());
    let mut shell_only = config("v1");
    shell_only.manifest.clear();
    registration.install(shell_only).await.unwrap();

    let started = Instant::now();
    let response = respond(registration.fetch(Request::get(url("/app.js"))).await.unwrap());
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(response.text().unwrap(), "app()");

    let key = RequestKey::get(&url("/app.js"));
    assert!(caches.match_request("draw-party-v1", &key).await.unwrap().is_none());

    assert_eq!(registration.settle().await, 1);
    let stored = caches.match_request("draw-party-v1", &key).await.unwrap().unwrap();
    assert_eq!(stored.body, b"app()");
    assert_eq!(fetcher.calls(), 1);
}
