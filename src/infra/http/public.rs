use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{RawQuery, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};

use crate::application::error::HttpError;
use crate::application::feed::FeedService;
use crate::cache::{CacheState, FEED_CONTENT_TYPE, response_cache_layer};
use crate::domain::query::QueryParams;

use super::etag::etag_layer;
use super::middleware::{log_responses, request_timeout, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub cache: Option<CacheState>,
    pub request_timeout: Duration,
}

pub fn build_router(state: HttpState) -> Router {
    let feed_routes = Router::new().route("/", any(feed)).fallback(feed);

    let feed_routes = if let Some(cache_state) = state.cache.clone() {
        feed_routes.layer(middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        ))
    } else {
        feed_routes
    };

    let feed_routes = feed_routes.layer(middleware::from_fn(etag_layer));

    let static_routes = Router::new().route("/_health", get(health));

    feed_routes
        .merge(static_routes)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.request_timeout,
            request_timeout,
        ))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn feed(
    State(state): State<HttpState>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let params = QueryParams::parse(query.as_deref().unwrap_or(""));
    match state.feed.render(&params).await {
        Ok(_) if method == Method::HEAD => {
            (StatusCode::OK, [(CONTENT_TYPE, FEED_CONTENT_TYPE)]).into_response()
        }
        Ok(rss) => (StatusCode::OK, [(CONTENT_TYPE, FEED_CONTENT_TYPE)], rss).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
