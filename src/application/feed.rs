use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::application::filter::{FilterOptions, FilterSet};
use crate::application::modifier::{self, Modifier};
use crate::application::parse::{ParseError, parse_feed};
use crate::application::source::{FeedSource, FetchError};
use crate::application::syndication;
use crate::domain::feed::Feed;
use crate::domain::query::{QueryParams, UPSTREAM_URL_PARAM};

const METRIC_UPSTREAM_FETCH_MS: &str = "feedfilter_upstream_fetch_ms";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("must set URL")]
    MissingUrl,
    #[error("cannot set multiple URL")]
    MultipleUrls,
    #[error("ParseURL Error: {0}")]
    Fetch(#[from] FetchError),
    #[error("ParseURL Error: {0}")]
    Parse(#[from] ParseError),
}

/// Fetches an upstream feed and renders the filtered result as RSS.
#[derive(Clone)]
pub struct FeedService {
    source: Arc<dyn FeedSource>,
    options: Arc<FilterOptions>,
}

impl FeedService {
    pub fn new(source: Arc<dyn FeedSource>, options: FilterOptions) -> Self {
        Self {
            source,
            options: Arc::new(options),
        }
    }

    pub async fn render(&self, params: &QueryParams) -> Result<String, FeedError> {
        self.render_at(params, OffsetDateTime::now_utc()).await
    }

    /// Render with `now` as the reference time for relative date filters.
    #[instrument(skip_all)]
    pub async fn render_at(
        &self,
        params: &QueryParams,
        now: OffsetDateTime,
    ) -> Result<String, FeedError> {
        let url = upstream_url(params)?;

        let started_at = Instant::now();
        let fetched = self.source.fetch(url).await;
        histogram!(
            METRIC_UPSTREAM_FETCH_MS,
            "result" => if fetched.is_ok() { "ok" } else { "error" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
        let body = fetched?;

        let feed = parse_feed(&body)?;
        let total = feed.items.len();

        let filters = FilterSet::from_params(params, &self.options);
        let modifiers = modifier::from_params(params);
        let feed = apply(feed, &filters, &modifiers, now);

        debug!(
            target = "feedfilter::application::feed",
            upstream = url,
            filters = filters.len(),
            modifiers = modifiers.len(),
            total,
            kept = feed.items.len(),
            "feed filtered"
        );

        Ok(syndication::rss(&feed))
    }
}

/// The single `url` parameter of a request.
pub fn upstream_url(params: &QueryParams) -> Result<&str, FeedError> {
    match params.get_all(UPSTREAM_URL_PARAM) {
        [] => Err(FeedError::MissingUrl),
        [url] => Ok(url.as_str()),
        _ => Err(FeedError::MultipleUrls),
    }
}

/// Keep items passing every filter, then rewrite them with each modifier.
pub fn apply(
    mut feed: Feed,
    filters: &FilterSet,
    modifiers: &[Modifier],
    now: OffsetDateTime,
) -> Feed {
    feed.items.retain(|item| filters.keep(item, now));
    for item in &mut feed.items {
        for modifier in modifiers {
            modifier.apply(item);
        }
    }
    feed
}
