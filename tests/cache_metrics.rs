use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    routing::get,
};
use bytes::Bytes;
use feedfilter::application::feed::FeedService;
use feedfilter::application::filter::FilterOptions;
use feedfilter::application::source::{FeedSource, FetchError};
use feedfilter::cache::{
    CacheConfig, CacheState, DiskStore, ProbeError, ProbeResponse, UpstreamProbe,
    response_cache_layer,
};
use feedfilter::domain::query::QueryParams;
use metrics_util::debugging::DebuggingRecorder;
use tower::ServiceExt;

struct SequenceProbe {
    answers: Mutex<Vec<Result<ProbeResponse, ProbeError>>>,
}

#[async_trait]
impl UpstreamProbe for SequenceProbe {
    async fn head(
        &self,
        _url: &str,
        _if_none_match: Option<&str>,
    ) -> Result<ProbeResponse, ProbeError> {
        let mut answers = self.answers.lock().unwrap();
        if answers.is_empty() {
            return Ok(ProbeResponse::new(StatusCode::NOT_MODIFIED));
        }
        answers.remove(0)
    }
}

struct RefusingSource;

#[async_trait]
impl FeedSource for RefusingSource {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
        Err(FetchError::Status { status: 503 })
    }
}

fn cached_app(dir: &std::path::Path, body: &'static str, probe: SequenceProbe) -> Router {
    let store = DiskStore::open(dir).expect("open store");
    let state = CacheState::new(
        CacheConfig::with_directory(dir),
        Arc::new(store),
        Arc::new(probe),
    );
    Router::new()
        .route("/", get(move || async move { body }))
        .layer(middleware::from_fn_with_state(state, response_cache_layer))
}

async fn get_status(app: &Router, uri: &str) -> StatusCode {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
        .status()
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // miss, probe failure served as hit, then stale
    let dir = tempfile::tempdir().expect("temp dir");
    let app = cached_app(
        dir.path(),
        "<rss/>",
        SequenceProbe {
            answers: Mutex::new(vec![
                Ok(ProbeResponse::new(StatusCode::OK).with_etag("\"v1\"")),
                Err(ProbeError::Transport("connection refused".to_string())),
                Ok(ProbeResponse::new(StatusCode::OK).with_etag("\"v2\"")),
            ]),
        },
    );
    let uri = "/?url=https://example.com/feed.xml";
    for _ in 0..3 {
        assert_eq!(get_status(&app, uri).await, StatusCode::OK);
    }

    // empty downstream body cannot be persisted
    let empty_dir = tempfile::tempdir().expect("temp dir");
    let empty_app = cached_app(
        empty_dir.path(),
        "",
        SequenceProbe {
            answers: Mutex::new(Vec::new()),
        },
    );
    assert_eq!(
        get_status(&empty_app, "/?empty=1").await,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    // upstream fetch latency is recorded for failures too
    let service = FeedService::new(Arc::new(RefusingSource), FilterOptions::default());
    let params = QueryParams::parse("url=https://example.com/feed.xml");
    assert!(service.render(&params).await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "feedfilter_cache_hit_total",
        "feedfilter_cache_miss_total",
        "feedfilter_cache_stale_total",
        "feedfilter_cache_persist_error_total",
        "feedfilter_probe_failure_total",
        "feedfilter_upstream_fetch_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
