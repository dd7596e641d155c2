//! Buffering of downstream responses for persistence.

use axum::{
    body::Body,
    http::{StatusCode, response::Parts},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};

use super::error::CacheError;
use super::keys::CacheKey;
use super::store::DiskStore;

/// Result of draining a downstream response.
#[derive(Debug)]
pub enum Recorded {
    /// The whole body fit within the limit.
    Captured(ResponseCapture),
    /// The body outgrew the limit; the response streams on unchanged.
    Oversized(Response),
}

/// A downstream response whose body has been fully read.
#[derive(Debug)]
pub struct ResponseCapture {
    parts: Parts,
    body: Bytes,
}

impl ResponseCapture {
    /// Drain `response` while it stays within `limit` bytes.
    ///
    /// Larger bodies are handed back as a response that replays the bytes read
    /// so far followed by the rest of the original stream.
    pub async fn record(response: Response, limit: usize) -> Result<Recorded, CacheError> {
        let (parts, body) = response.into_parts();
        let mut frames = body.into_data_stream();
        let mut buffered = BytesMut::new();

        while let Some(chunk) = frames.next().await {
            let chunk = chunk.map_err(|err| CacheError::Body(err.to_string()))?;
            if buffered.len() + chunk.len() > limit {
                let head = stream::iter([Ok::<_, axum::Error>(buffered.freeze()), Ok(chunk)]);
                let body = Body::from_stream(head.chain(frames));
                return Ok(Recorded::Oversized(Response::from_parts(parts, body)));
            }
            buffered.extend_from_slice(&chunk);
        }

        Ok(Recorded::Captured(Self {
            parts,
            body: buffered.freeze(),
        }))
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Only successful responses are written to disk.
    pub fn is_cacheable(&self) -> bool {
        self.parts.status.is_success()
    }

    pub async fn persist(&self, store: &DiskStore, key: &CacheKey) -> Result<(), CacheError> {
        if self.body.is_empty() {
            return Err(CacheError::NoContent);
        }
        store.write(key, self.body.clone()).await
    }

    /// Rebuild the response unchanged.
    pub fn into_response(self) -> Response {
        Response::from_parts(self.parts, Body::from(self.body))
    }
}
