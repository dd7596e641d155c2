//! Feed response cache.
//!
//! Rendered feeds are written to a flat directory, one file per distinct
//! query string. Entries are revalidated against the upstream feed with a
//! conditional `HEAD` before being served.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! directory = "/tmp/feedfilter-cache"
//! probe_timeout_seconds = 10
//! coalesce_misses = true
//! ```

mod capture;
mod config;
mod error;
mod etags;
mod inflight;
mod keys;
mod lock;
mod middleware;
mod probe;
mod store;

pub use capture::{Recorded, ResponseCapture};
pub use config::{CacheConfig, default_cache_dir};
pub use error::CacheError;
pub use etags::EtagStore;
pub use inflight::{InFlightMisses, MissGuard};
pub use keys::{CACHE_FILE_EXTENSION, CacheKey};
pub use middleware::{CacheState, FEED_CONTENT_TYPE, X_CACHE, response_cache_layer};
pub use probe::{
    Freshness, HttpProbe, ProbeError, ProbeResponse, Revalidator, UpstreamProbe, judge,
};
pub use store::{CachedFile, DiskStore};
