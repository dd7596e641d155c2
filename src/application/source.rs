//! Traits describing upstream feed adapters.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("upstream responded with HTTP {status}")]
    Status { status: u16 },
}

impl FetchError {
    pub fn from_transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Retrieves raw feed documents.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
