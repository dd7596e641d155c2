//! Upstream freshness probing.
//!
//! A cached entry is revalidated with a `HEAD` request against the feed it was
//! generated from. The verdict is fail-open: when the origin cannot be reached
//! the cached copy is served. When the origin answers but offers no usable
//! validator the entry is treated as stale.

use std::{sync::Arc, time::Duration, time::Instant, time::SystemTime};

use async_trait::async_trait;
use axum::http::{
    StatusCode,
    header::{ETAG, IF_NONE_MATCH, LAST_MODIFIED},
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::etags::EtagStore;
use super::keys::CacheKey;

pub(crate) const METRIC_PROBE_FAILURE_TOTAL: &str = "feedfilter_probe_failure_total";

/// Validators returned by an upstream `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ProbeResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, value: impl Into<String>) -> Self {
        self.last_modified = Some(value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("upstream probe failed: {0}")]
    Transport(String),
}

/// Issues `HEAD` requests against an upstream feed.
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    async fn head(
        &self,
        url: &str,
        if_none_match: Option<&str>,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// [`UpstreamProbe`] backed by `reqwest` with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamProbe for HttpProbe {
    async fn head(
        &self,
        url: &str,
        if_none_match: Option<&str>,
    ) -> Result<ProbeResponse, ProbeError> {
        let mut request = self.client.head(url);
        if let Some(etag) = if_none_match {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProbeError::Transport(err.to_string()))?;

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Ok(ProbeResponse {
            status: response.status(),
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        })
    }
}

/// Outcome of a freshness check, with the rule that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    NotModified,
    EtagMatch,
    EtagMismatch,
    NotModifiedSince,
    ModifiedSince,
    Unreachable,
    NoValidator,
}

impl Freshness {
    pub fn is_fresh(self) -> bool {
        matches!(
            self,
            Freshness::NotModified
                | Freshness::EtagMatch
                | Freshness::NotModifiedSince
                | Freshness::Unreachable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::NotModified => "not_modified",
            Freshness::EtagMatch => "etag_match",
            Freshness::EtagMismatch => "etag_mismatch",
            Freshness::NotModifiedSince => "not_modified_since",
            Freshness::ModifiedSince => "modified_since",
            Freshness::Unreachable => "unreachable",
            Freshness::NoValidator => "no_validator",
        }
    }
}

/// Decide freshness from a probe response.
///
/// Rules apply in order: `304`, ETag comparison when both sides have one,
/// `Last-Modified` against `cached_at`, otherwise stale.
pub fn judge(
    response: &ProbeResponse,
    stored_etag: Option<&str>,
    cached_at: SystemTime,
) -> Freshness {
    if response.status == StatusCode::NOT_MODIFIED {
        return Freshness::NotModified;
    }

    if let (Some(current), Some(stored)) = (response.etag.as_deref(), stored_etag) {
        return if current == stored {
            Freshness::EtagMatch
        } else {
            Freshness::EtagMismatch
        };
    }

    if let Some(last_modified) = response
        .last_modified
        .as_deref()
        .and_then(|value| httpdate::parse_http_date(value).ok())
    {
        return if last_modified > cached_at {
            Freshness::ModifiedSince
        } else {
            Freshness::NotModifiedSince
        };
    }

    Freshness::NoValidator
}

/// Freshness checks and ETag capture for cache entries.
#[derive(Clone)]
pub struct Revalidator {
    probe: Arc<dyn UpstreamProbe>,
    etags: Arc<EtagStore>,
}

impl Revalidator {
    pub fn new(probe: Arc<dyn UpstreamProbe>, etags: Arc<EtagStore>) -> Self {
        Self { probe, etags }
    }

    pub fn etags(&self) -> &Arc<EtagStore> {
        &self.etags
    }

    /// Probe `upstream_url` and judge the entry cached at `cached_at`.
    ///
    /// Never mutates the ETag index.
    pub async fn freshness(
        &self,
        upstream_url: &str,
        key: &CacheKey,
        cached_at: SystemTime,
    ) -> Freshness {
        let started_at = Instant::now();
        let stored = self.etags.get(key);

        let verdict = match self.probe.head(upstream_url, stored.as_deref()).await {
            Ok(response) => judge(&response, stored.as_deref(), cached_at),
            Err(err) => {
                counter!(METRIC_PROBE_FAILURE_TOTAL).increment(1);
                warn!(
                    target = "feedfilter::cache::probe",
                    op = "probe::freshness",
                    result = "unreachable",
                    cache_key = %key,
                    upstream = upstream_url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Upstream probe failed; serving cached copy"
                );
                Freshness::Unreachable
            }
        };

        debug!(
            target = "feedfilter::cache::probe",
            op = "probe::freshness",
            result = verdict.as_str(),
            fresh = verdict.is_fresh(),
            cache_key = %key,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "freshness decided"
        );
        verdict
    }

    pub async fn is_fresh(&self, upstream_url: &str, key: &CacheKey, cached_at: SystemTime) -> bool {
        self.freshness(upstream_url, key, cached_at).await.is_fresh()
    }

    /// Record the upstream's current ETag for `key`, if it reports one.
    pub async fn capture_etag(&self, upstream_url: &str, key: &CacheKey) {
        match self.probe.head(upstream_url, None).await {
            Ok(response) => {
                if let Some(etag) = response.etag {
                    self.etags.set(key, etag);
                }
            }
            Err(err) => {
                debug!(
                    target = "feedfilter::cache::probe",
                    op = "probe::capture_etag",
                    result = "error",
                    cache_key = %key,
                    error = %err,
                    "ETag capture skipped"
                );
            }
        }
    }
}
