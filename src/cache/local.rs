//! Process-private cache tier.

use crate::types::ChatResponse;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: ChatResponse,
    expires_at: Instant,
}

/// Bounded, TTL-evicting store.
///
/// Reads use `peek`, so recency is never refreshed and the eviction order when
/// full is insertion order (oldest first). Expired entries are dropped lazily on
/// read and in bulk by [`LocalCache::purge_expired`].
pub struct LocalCache {
    entries: Mutex<LruCache<String, LocalEntry>>,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the value and its remaining time to live.
    pub fn get(&self, key: &str) -> Option<(ChatResponse, Duration)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.peek(key) {
            Some(e) if e.expires_at > now => Some((e.value.clone(), e.expires_at - now)),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Replaces any existing entry. Re-inserting an existing key counts as a new insertion.
    pub fn insert(&self, key: &str, value: ChatResponse, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = LocalEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.lock();
        entries.pop(key);
        entries.push(key.to_string(), entry);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(text: &str) -> ChatResponse {
        ChatResponse::assistant("m", text, 0)
    }

    #[test]
    fn returns_value_until_ttl() {
        let cache = LocalCache::new(4);
        cache.insert("k", resp("v"), Duration::from_millis(40));
        let (v, remaining) = cache.get("k").unwrap();
        assert_eq!(v.content(), Some("v"));
        assert!(remaining <= Duration::from_millis(40));

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_inserted_first() {
        let cache = LocalCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.insert("a", resp("a"), ttl);
        cache.insert("b", resp("b"), ttl);
        // Reading "a" must not protect it from eviction.
        assert!(cache.get("a").is_some());
        cache.insert("c", resp("c"), ttl);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = LocalCache::new(8);
        cache.insert("short", resp("s"), Duration::from_millis(10));
        cache.insert("long", resp("l"), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
