//! Per-key coalescing of cache regeneration.
//!
//! The first request to miss on a key holds the key's lock while the feed is
//! regenerated. Later requests for the same key wait, then re-check the disk
//! cache before doing any work of their own.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::CacheKey;

type Slot = Arc<Mutex<()>>;

#[derive(Default, Clone)]
pub struct InFlightMisses {
    keys: Arc<DashMap<CacheKey, Slot>>,
}

impl InFlightMisses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request is regenerating `key`, then claim it.
    pub async fn acquire(&self, key: &CacheKey) -> MissGuard {
        let slot = Arc::clone(self.keys.entry(key.clone()).or_default().value());
        let permit = Arc::clone(&slot).lock_owned().await;
        MissGuard {
            key: key.clone(),
            keys: Arc::clone(&self.keys),
            slot,
            permit: Some(permit),
        }
    }

    /// Number of keys with a holder or waiters.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub struct MissGuard {
    key: CacheKey,
    keys: Arc<DashMap<CacheKey, Slot>>,
    slot: Slot,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for MissGuard {
    fn drop(&mut self) {
        self.permit.take();
        // The map and this guard are the only owners when nobody is waiting.
        let slot = &self.slot;
        self.keys
            .remove_if(&self.key, |_, current| {
                Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
            });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::query::QueryParams;

    fn key(url: &str) -> CacheKey {
        let mut params = QueryParams::new();
        params.append("url", url);
        CacheKey::derive(&params)
    }

    #[tokio::test]
    async fn released_key_is_forgotten() {
        let inflight = InFlightMisses::new();
        let guard = inflight.acquire(&key("https://example.com/a")).await;
        assert_eq!(inflight.len(), 1);
        drop(guard);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn same_key_waits_for_holder() {
        let inflight = InFlightMisses::new();
        let order = Arc::new(AtomicUsize::new(0));
        let key = key("https://example.com/a");

        let guard = inflight.acquire(&key).await;

        let waiter = {
            let inflight = inflight.clone();
            let order = Arc::clone(&order);
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = inflight.acquire(&key).await;
                order.fetch_add(1, Ordering::SeqCst)
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(order.load(Ordering::SeqCst), 0);
        order.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        let seen = waiter.await.expect("waiter finishes");
        assert_eq!(seen, 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let inflight = InFlightMisses::new();
        let _a = inflight.acquire(&key("https://example.com/a")).await;

        let b = tokio::time::timeout(
            Duration::from_secs(1),
            inflight.acquire(&key("https://example.com/b")),
        )
        .await
        .expect("independent key acquired immediately");

        assert_eq!(inflight.len(), 2);
        drop(b);
        assert_eq!(inflight.len(), 1);
    }
}
