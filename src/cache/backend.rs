//! Shared-tier backend implementations.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cross-process key-value store behind the local tier.
///
/// Values are opaque strings; the tiered cache owns their encoding. A backend
/// enforces `ttl` itself where it can, the tiered cache re-checks expiry anyway.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Release connections. Further calls may fail.
    async fn close(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct MemoryEntry {
    data: String,
    expires_at: Instant,
}

/// In-process backend. Clones share storage, which lets several gateway
/// contexts in one process (tests, embedded use) act as separate workers
/// over one shared tier.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(e) if e.expires_at > now => Ok(Some(e.data.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.write().insert(
            key.to_string(),
            MemoryEntry {
                data: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
