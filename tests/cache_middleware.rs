use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
};
use feedfilter::cache::{
    CacheConfig, CacheKey, CacheState, DiskStore, ProbeError, ProbeResponse, UpstreamProbe,
    X_CACHE, response_cache_layer,
};
use feedfilter::domain::query::QueryParams;
use tower::ServiceExt;

const FEED_QUERY: &str = "url=https://example.com/feed.xml";

/// Replays scripted probe answers; the last answer repeats.
struct ScriptedProbe {
    answers: Mutex<Vec<Result<ProbeResponse, ()>>>,
    calls: AtomicUsize,
    last_if_none_match: Mutex<Option<String>>,
}

impl ScriptedProbe {
    fn new(answers: Vec<Result<ProbeResponse, ()>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers),
            calls: AtomicUsize::new(0),
            last_if_none_match: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamProbe for ScriptedProbe {
    async fn head(
        &self,
        _url: &str,
        if_none_match: Option<&str>,
    ) -> Result<ProbeResponse, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_if_none_match.lock().unwrap() = if_none_match.map(str::to_string);

        let mut answers = self.answers.lock().unwrap();
        let answer = if answers.len() > 1 {
            answers.remove(0)
        } else {
            answers
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(ProbeResponse::new(StatusCode::OK)))
        };
        answer.map_err(|()| ProbeError::Transport("connection refused".to_string()))
    }
}

struct Harness {
    app: Router,
    state: CacheState,
    downstream_calls: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(probe: Arc<ScriptedProbe>, status: StatusCode, body: &'static str) -> Self {
        Self::with_config(probe, status, body, |_| {})
    }

    fn with_config(
        probe: Arc<ScriptedProbe>,
        status: StatusCode,
        body: &'static str,
        configure: impl FnOnce(&mut CacheConfig),
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = CacheConfig::with_directory(dir.path());
        configure(&mut config);

        let store = DiskStore::open(dir.path()).expect("open store");
        let state = CacheState::new(config, Arc::new(store), probe);

        let downstream_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&downstream_calls);
        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        (status, body)
                    }
                })
                .post(|| async { (StatusCode::OK, "posted") }),
            )
            .layer(middleware::from_fn_with_state(
                state.clone(),
                response_cache_layer,
            ));

        Self {
            app,
            state,
            downstream_calls,
            _dir: dir,
        }
    }

    async fn request(&self, method: Method, query: &str) -> Response {
        let uri = if query.is_empty() {
            "/".to_string()
        } else {
            format!("/?{query}")
        };
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(&self, query: &str) -> Response {
        self.request(Method::GET, query).await
    }

    fn downstream_calls(&self) -> usize {
        self.downstream_calls.load(Ordering::SeqCst)
    }

    fn cache_path(&self, query: &str) -> std::path::PathBuf {
        self.state
            .store
            .path(&CacheKey::derive(&QueryParams::parse(query)))
    }
}

fn x_cache(response: &Response) -> &str {
    response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn revalidated_entry_is_served_without_regenerating() {
    let probe = ScriptedProbe::new(vec![Ok(
        ProbeResponse::new(StatusCode::NOT_MODIFIED).with_etag("\"v1\"")
    )]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss>one</rss>");

    let first = harness.get(FEED_QUERY).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(body_text(first).await, "<rss>one</rss>");
    assert!(harness.cache_path(FEED_QUERY).exists());

    let second = harness.get(FEED_QUERY).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(body_text(second).await, "<rss>one</rss>");

    assert_eq!(harness.downstream_calls(), 1);
    assert_eq!(
        probe.last_if_none_match.lock().unwrap().as_deref(),
        Some("\"v1\"")
    );
    let key = CacheKey::derive(&QueryParams::parse(FEED_QUERY));
    assert_eq!(harness.state.etags().get(&key).as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn entries_without_upstream_are_served_without_probing() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");

    let first = harness.get("title_contains=rust").await;
    assert_eq!(x_cache(&first), "MISS");
    let second = harness.get("title_contains=rust").await;
    assert_eq!(x_cache(&second), "HIT");

    assert_eq!(harness.downstream_calls(), 1);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn changed_upstream_discards_entry_and_regenerates() {
    let probe = ScriptedProbe::new(vec![
        // ETag capture after the first miss.
        Ok(ProbeResponse::new(StatusCode::OK).with_etag("\"v1\"")),
        // Revalidation of the second request.
        Ok(ProbeResponse::new(StatusCode::OK).with_etag("\"v2\"")),
        // ETag capture after regeneration fails.
        Err(()),
    ]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");
    let key = CacheKey::derive(&QueryParams::parse(FEED_QUERY));

    let first = harness.get(FEED_QUERY).await;
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(harness.state.etags().get(&key).as_deref(), Some("\"v1\""));

    let second = harness.get(FEED_QUERY).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "MISS");

    assert_eq!(harness.downstream_calls(), 2);
    assert_eq!(probe.calls(), 3);
    assert_eq!(harness.state.etags().get(&key), None);
    assert!(harness.cache_path(FEED_QUERY).exists());
}

#[tokio::test]
async fn unreachable_upstream_serves_cached_copy() {
    let probe = ScriptedProbe::new(vec![
        Ok(ProbeResponse::new(StatusCode::OK).with_etag("\"v1\"")),
        Err(()),
    ]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");

    harness.get(FEED_QUERY).await;
    let second = harness.get(FEED_QUERY).await;

    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(harness.downstream_calls(), 1);
}

#[tokio::test]
async fn upstream_without_validators_is_stale() {
    let probe = ScriptedProbe::new(vec![Ok(ProbeResponse::new(StatusCode::OK))]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");

    harness.get(FEED_QUERY).await;
    let second = harness.get(FEED_QUERY).await;

    assert_eq!(x_cache(&second), "MISS");
    assert_eq!(harness.downstream_calls(), 2);
}

#[tokio::test]
async fn empty_body_fails_without_writing() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "");

    let response = harness.get(FEED_QUERY).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Failed to cache response");
    assert!(!harness.cache_path(FEED_QUERY).exists());
}

#[tokio::test]
async fn downstream_errors_are_forwarded_and_not_cached() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::BAD_REQUEST, "must set URL");

    let first = harness.get("title_contains=rust").await;
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(first).await, "must set URL");
    assert!(!harness.cache_path("title_contains=rust").exists());

    harness.get("title_contains=rust").await;
    assert_eq!(harness.downstream_calls(), 2);
}

#[tokio::test]
async fn non_get_requests_bypass_cache() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");

    let response = harness.request(Method::POST, FEED_QUERY).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(X_CACHE).is_none());
    assert!(!harness.cache_path(FEED_QUERY).exists());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn disabled_cache_passes_through() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::with_config(Arc::clone(&probe), StatusCode::OK, "<rss/>", |config| {
        config.enabled = false;
    });

    harness.get(FEED_QUERY).await;
    let second = harness.get(FEED_QUERY).await;

    assert!(second.headers().get(X_CACHE).is_none());
    assert_eq!(harness.downstream_calls(), 2);
    assert!(!harness.cache_path(FEED_QUERY).exists());
}

#[tokio::test]
async fn concurrent_misses_share_one_regeneration() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss>shared</rss>");

    let (first, second) = tokio::join!(harness.get("shared=1"), harness.get("shared=1"));

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    let mut outcomes = vec![x_cache(&first).to_string(), x_cache(&second).to_string()];
    outcomes.sort();
    assert_eq!(outcomes, vec!["HIT".to_string(), "MISS".to_string()]);
    assert_eq!(body_text(first).await, "<rss>shared</rss>");
    assert_eq!(body_text(second).await, "<rss>shared</rss>");
    assert_eq!(harness.downstream_calls(), 1);
    assert!(harness.state.inflight.is_empty());
}

#[tokio::test]
async fn distinct_queries_use_distinct_entries() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::new(Arc::clone(&probe), StatusCode::OK, "<rss/>");

    harness.get("a=1").await;
    harness.get("a=2").await;

    assert_eq!(harness.downstream_calls(), 2);
    assert!(harness.cache_path("a=1").exists());
    assert!(harness.cache_path("a=2").exists());
    assert_ne!(harness.cache_path("a=1"), harness.cache_path("a=2"));
}

#[tokio::test]
async fn uncoalesced_misses_regenerate_independently() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::with_config(
        Arc::clone(&probe),
        StatusCode::OK,
        "<rss>last</rss>",
        |config| config.coalesce_misses = false,
    );

    let (first, second) = tokio::join!(harness.get("shared=1"), harness.get("shared=1"));

    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(x_cache(&second), "MISS");
    assert_eq!(body_text(first).await, "<rss>last</rss>");
    assert_eq!(body_text(second).await, "<rss>last</rss>");
    assert_eq!(harness.downstream_calls(), 2);
    assert!(harness.state.inflight.is_empty());

    let third = harness.get("shared=1").await;
    assert_eq!(x_cache(&third), "HIT");
    assert_eq!(harness.downstream_calls(), 2);
}

#[tokio::test]
async fn oversized_responses_are_forwarded_uncached() {
    let probe = ScriptedProbe::new(vec![]);
    let harness = Harness::with_config(
        Arc::clone(&probe),
        StatusCode::OK,
        "<rss>larger than the limit</rss>",
        |config| config.max_body_bytes = 8,
    );

    let response = harness.get(FEED_QUERY).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(X_CACHE).is_none());
    assert_eq!(body_text(response).await, "<rss>larger than the limit</rss>");
    assert!(!harness.cache_path(FEED_QUERY).exists());
    assert_eq!(probe.calls(), 0);
}
