//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::query::QueryParams;

/// Suffix marking cached artifacts as rendered feed XML.
pub const CACHE_FILE_EXTENSION: &str = ".rss";

/// Filesystem-safe identifier of a cached response.
///
/// The key is the lowercase hex SHA-256 of the canonical query encoding
/// followed by [`CACHE_FILE_EXTENSION`]. It is not reversible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(params: &QueryParams) -> Self {
        let encoded = params.encode();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        Self(format!(
            "{}{CACHE_FILE_EXTENSION}",
            hex::encode(hasher.finalize())
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
