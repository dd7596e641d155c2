//! HTTP adapter for fetching upstream feeds.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::application::source::{FeedSource, FetchError};

use super::error::InfraError;

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(FetchError::from_transport)?;
        debug!(
            target = "feedfilter::infra::upstream",
            upstream = url,
            bytes = body.len(),
            "upstream feed fetched"
        );
        Ok(body)
    }
}
