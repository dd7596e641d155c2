//! In-memory index of upstream ETags per cache key.

use std::collections::HashMap;
use std::sync::RwLock;

use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::etags";

/// Last observed upstream ETag for each cache key.
///
/// Lives as long as the owning cache state; nothing is persisted, so a
/// restart forces one unconditional revalidation per key.
#[derive(Debug, Default)]
pub struct EtagStore {
    entries: RwLock<HashMap<CacheKey, String>>,
}

impl EtagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        rw_read(&self.entries, SOURCE, "get").get(key).cloned()
    }

    /// Record `etag` for `key`. Empty values are ignored.
    pub fn set(&self, key: &CacheKey, etag: impl Into<String>) {
        let etag = etag.into();
        if etag.is_empty() {
            return;
        }
        rw_write(&self.entries, SOURCE, "set").insert(key.clone(), etag);
    }

    pub fn remove(&self, key: &CacheKey) {
        rw_write(&self.entries, SOURCE, "remove").remove(key);
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::domain::query::QueryParams;

    fn key(url: &str) -> CacheKey {
        let mut params = QueryParams::new();
        params.append("url", url);
        CacheKey::derive(&params)
    }

    #[test]
    fn set_then_get_returns_value() {
        let store = EtagStore::new();
        let key = key("https://example.com/feed");

        assert!(store.get(&key).is_none());
        store.set(&key, "\"abc123\"");
        assert_eq!(store.get(&key).as_deref(), Some("\"abc123\""));
    }

    #[test]
    fn remove_clears_value() {
        let store = EtagStore::new();
        let key = key("https://example.com/feed");

        store.set(&key, "\"abc123\"");
        store.remove(&key);
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn empty_value_keeps_previous_entry() {
        let store = EtagStore::new();
        let key = key("https://example.com/feed");

        store.set(&key, "");
        assert!(store.get(&key).is_none());

        store.set(&key, "\"v1\"");
        store.set(&key, "");
        assert_eq!(store.get(&key).as_deref(), Some("\"v1\""));
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = Arc::new(EtagStore::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let key = key(&format!("https://example.com/{n}"));
                    for round in 0..100 {
                        store.set(&key, format!("\"{n}-{round}\""));
                        assert!(store.get(&key).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer thread should finish");
        }

        assert_eq!(store.len(), 8);
        assert_eq!(
            store.get(&key("https://example.com/3")).as_deref(),
            Some("\"3-99\"")
        );
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let store = EtagStore::new();
        let key = key("https://example.com/feed");

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set(&key, "\"after\"");
        assert_eq!(store.get(&key).as_deref(), Some("\"after\""));
    }
}
