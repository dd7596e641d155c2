//! Cache configuration.
//!
//! Controls the on-disk response cache and upstream revalidation.

use std::path::PathBuf;
use std::time::Duration;

// Default values for cache configuration
pub(crate) const DEFAULT_CACHE_DIR_NAME: &str = "feedfilter-cache";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Runtime cache configuration, resolved from [`crate::config::CacheSettings`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and persist responses through the disk cache.
    pub enabled: bool,
    /// Flat directory holding one file per cache key.
    pub directory: PathBuf,
    /// Upper bound for a single upstream HEAD probe.
    pub probe_timeout: Duration,
    /// Largest downstream body captured for persistence.
    pub max_body_bytes: usize,
    /// Let concurrent misses for one key share a single regeneration.
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            coalesce_misses: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            directory: settings.directory.clone(),
            probe_timeout: settings.probe_timeout,
            max_body_bytes: settings.max_body_bytes.get(),
            coalesce_misses: settings.coalesce_misses,
        }
    }
}

impl CacheConfig {
    /// Configuration rooted at `directory`, other values defaulted.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

/// `{system temp dir}/feedfilter-cache`.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}
