//! Disk-backed response cache middleware.
//!
//! Serves GET responses from the cache directory, revalidating entries
//! against the upstream feed named by the `url` query parameter. Misses run
//! the inner service, persist its body and serve the persisted file.

use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_TYPE, LAST_MODIFIED},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::error::HttpError;
use crate::domain::query::QueryParams;

use super::{
    CacheConfig, CacheError, DiskStore, EtagStore, InFlightMisses, Recorded, ResponseCapture,
    Revalidator, UpstreamProbe, keys::CacheKey,
};

pub const FEED_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
pub const X_CACHE: &str = "x-cache";

const METRIC_CACHE_HIT_TOTAL: &str = "feedfilter_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "feedfilter_cache_miss_total";
const METRIC_CACHE_STALE_TOTAL: &str = "feedfilter_cache_stale_total";
const METRIC_CACHE_PERSIST_ERROR_TOTAL: &str = "feedfilter_cache_persist_error_total";

const SOURCE: &str = "cache::middleware::response_cache_layer";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<DiskStore>,
    pub revalidator: Revalidator,
    pub inflight: InFlightMisses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Hit,
    Stale,
    Miss,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: Arc<DiskStore>, probe: Arc<dyn UpstreamProbe>) -> Self {
        let etags = Arc::new(EtagStore::new());
        Self {
            config,
            store,
            revalidator: Revalidator::new(probe, etags),
            inflight: InFlightMisses::new(),
        }
    }

    pub fn etags(&self) -> &Arc<EtagStore> {
        self.revalidator.etags()
    }

    async fn lookup(&self, key: &CacheKey, upstream: Option<&str>) -> Lookup {
        let cached_at = match self.store.modified(key).await {
            Ok(Some(modified)) => modified,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                warn!(
                    target = "feedfilter::cache::middleware",
                    cache_key = %key,
                    error = %err,
                    "cache metadata unreadable; treating as miss"
                );
                return Lookup::Miss;
            }
        };

        let Some(upstream) = upstream else {
            return Lookup::Hit;
        };

        if self.revalidator.is_fresh(upstream, key, cached_at).await {
            return Lookup::Hit;
        }

        if let Err(err) = self.store.remove(key).await {
            warn!(
                target = "feedfilter::cache::middleware",
                cache_key = %key,
                error = %err,
                "failed to remove stale cache file"
            );
        }
        self.etags().remove(key);
        Lookup::Stale
    }

    async fn serve(&self, key: &CacheKey, outcome: &'static str) -> Result<Response, CacheError> {
        let cached = self.store.read(key).await?;
        Ok(cached_response(cached.body, cached.modified, outcome))
    }

    async fn regenerate(
        &self,
        key: &CacheKey,
        upstream: Option<&str>,
        request: Request<Body>,
        next: Next,
    ) -> Response {
        let response = next.run(request).await;

        let capture = match ResponseCapture::record(response, self.config.max_body_bytes).await {
            Ok(Recorded::Captured(capture)) => capture,
            Ok(Recorded::Oversized(response)) => {
                warn!(
                    target = "feedfilter::cache::middleware",
                    cache_key = %key,
                    limit_bytes = self.config.max_body_bytes,
                    "response exceeds cacheable size; forwarded without caching"
                );
                return response;
            }
            Err(err) => return persist_failure(key, &err),
        };

        if !capture.is_cacheable() {
            debug!(
                target = "feedfilter::cache::middleware",
                cache_key = %key,
                status = capture.status().as_u16(),
                "downstream error forwarded without caching"
            );
            return capture.into_response();
        }

        if let Some(upstream) = upstream {
            self.revalidator.capture_etag(upstream, key).await;
        }

        if let Err(err) = capture.persist(&self.store, key).await {
            return persist_failure(key, &err);
        }

        match self.serve(key, "MISS").await {
            Ok(response) => response,
            Err(err) => persist_failure(key, &err),
        }
    }
}

/// Middleware for the disk response cache.
///
/// Only GET requests are cached. Requests without a `url` parameter are
/// served from disk when an entry exists and never probe upstream.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let params = QueryParams::parse(request.uri().query().unwrap_or(""));
    let key = CacheKey::derive(&params);
    let upstream = params.upstream_url().map(str::to_string);

    let lookup = cache.lookup(&key, upstream.as_deref()).await;
    if lookup == Lookup::Hit {
        match cache.serve(&key, "HIT").await {
            Ok(response) => {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                debug!(cache = "disk", outcome = "hit", cache_key = %key, "serving cached response");
                return response;
            }
            Err(err) => {
                warn!(
                    target = "feedfilter::cache::middleware",
                    cache_key = %key,
                    error = %err,
                    "cache file unreadable; regenerating"
                );
            }
        }
    }

    if lookup == Lookup::Stale {
        counter!(METRIC_CACHE_STALE_TOTAL).increment(1);
    }

    let _guard = if cache.config.coalesce_misses {
        let guard = cache.inflight.acquire(&key).await;
        if let Ok(Some(_)) = cache.store.modified(&key).await
            && let Ok(response) = cache.serve(&key, "HIT").await
        {
            counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
            debug!(
                cache = "disk",
                outcome = "coalesced",
                cache_key = %key,
                "serving response regenerated by concurrent request"
            );
            return response;
        }
        Some(guard)
    } else {
        None
    };

    counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
    debug!(
        cache = "disk",
        outcome = if lookup == Lookup::Stale { "stale" } else { "miss" },
        cache_key = %key,
        "regenerating response"
    );

    cache
        .regenerate(&key, upstream.as_deref(), request, next)
        .await
}

fn cached_response(body: bytes::Bytes, modified: SystemTime, outcome: &'static str) -> Response {
    let mut response = (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static(FEED_CONTENT_TYPE))],
        body,
    )
        .into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
        headers.insert(LAST_MODIFIED, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
    response
}

fn persist_failure(key: &CacheKey, err: &CacheError) -> Response {
    counter!(METRIC_CACHE_PERSIST_ERROR_TOTAL).increment(1);
    warn!(
        target = "feedfilter::cache::middleware",
        cache_key = %key,
        error = %err,
        "failed to cache response"
    );
    HttpError::from_error(
        SOURCE,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to cache response",
        err,
    )
    .into_response()
}
