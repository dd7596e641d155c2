//! Strong ETags for rendered feeds.
//!
//! GET responses with status 200 are buffered and tagged with the quoted hex
//! MD5 of their body. A matching `If-None-Match` turns the response into a
//! bodiless `304 Not Modified`.

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_LENGTH, ETAG, IF_NONE_MATCH},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use md5::{Digest, Md5};

use crate::application::error::HttpError;

/// Upper bound on the body size buffered for hashing.
const MAX_TAGGED_BODY_BYTES: usize = 64 * 1024 * 1024;

pub async fn etag_layer(request: Request<Body>, next: Next) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let if_none_match = request.headers().get(IF_NONE_MATCH).cloned();
    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_TAGGED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return HttpError::new(
                "infra::http::etag::etag_layer",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                format!("failed to buffer response body: {err}"),
            )
            .into_response();
        }
    };

    let tag = strong_etag(&bytes);
    if let Ok(value) = HeaderValue::from_str(&tag) {
        parts.headers.insert(ETAG, value);
    }

    if if_none_match
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| etag_listed(value, &tag))
    {
        return not_modified(&parts.headers);
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// `"<md5 hex>"` of `body`.
pub fn strong_etag(body: &[u8]) -> String {
    let digest = Md5::digest(body);
    format!("\"{}\"", hex::encode(digest))
}

fn etag_listed(if_none_match: &str, tag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == tag
    })
}

fn not_modified(headers: &HeaderMap) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    for (name, value) in headers {
        if name != CONTENT_LENGTH {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}
