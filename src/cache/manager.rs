//! Tiered cache manager.

use super::backend::CacheBackend;
use super::key::CacheKey;
use super::local::LocalCache;
use crate::types::ChatResponse;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn, Instrument};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entries: usize,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            enabled: true,
            max_entries: 1000,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Which tier served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Shared,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Local => "local",
            CacheTier::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub shared_errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.local_hits + self.shared_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    shared_errors: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            local_hits: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            shared_errors: AtomicU64::new(0),
        }
    }
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            shared_errors: self.shared_errors.load(Ordering::Relaxed),
        }
    }
}

/// Shared-tier encoding. `stored_at_ms` is wall-clock so other processes can
/// compute the remaining TTL.
#[derive(Debug, Serialize, Deserialize)]
struct SharedEntry {
    value: ChatResponse,
    stored_at_ms: u64,
    ttl_ms: u64,
}

impl SharedEntry {
    fn remaining(&self, now_ms: u64) -> Option<Duration> {
        let expires = self.stored_at_ms.saturating_add(self.ttl_ms);
        (expires > now_ms).then(|| Duration::from_millis(expires - now_ms))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Local tier in front of an optional shared tier.
///
/// Shared-tier failures never reach the caller: a failed read is a miss, a
/// failed write is logged and counted.
pub struct TieredCache {
    config: CacheConfig,
    local: LocalCache,
    shared: Option<Box<dyn CacheBackend>>,
    stats: AtomicStats,
}

impl TieredCache {
    pub fn new(config: CacheConfig, shared: Option<Box<dyn CacheBackend>>) -> Self {
        let local = LocalCache::new(config.max_entries);
        Self {
            config,
            local,
            shared,
            stats: AtomicStats::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CacheConfig::new().with_enabled(false), None)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub async fn get(&self, key: &CacheKey) -> Option<(ChatResponse, CacheTier)> {
        if !self.config.enabled {
            return None;
        }
        if let Some((value, _)) = self.local.get(key.as_str()) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some((value, CacheTier::Local));
        }

        let Some(shared) = self.shared.as_ref() else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let prefixed = self.prefix_key(key);
        let raw = match shared.get(&prefixed).await {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = shared.name(), error = %e, "shared cache read failed");
                None
            }
        };
        let hit = raw.and_then(|data| match serde_json::from_str::<SharedEntry>(&data) {
            Ok(entry) => entry.remaining(now_ms()).map(|ttl| (entry.value, ttl)),
            Err(e) => {
                self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = shared.name(), error = %e, "undecodable shared cache entry");
                None
            }
        });
        match hit {
            Some((value, remaining)) => {
                self.stats.shared_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, remaining_ms = remaining.as_millis() as u64, "promoting shared entry");
                self.local.insert(key.as_str(), value.clone(), remaining);
                Some((value, CacheTier::Shared))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: &CacheKey, value: &ChatResponse) {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    /// Write-through to both tiers.
    pub async fn set_with_ttl(&self, key: &CacheKey, value: &ChatResponse, ttl: Duration) {
        if !self.config.enabled || ttl.is_zero() {
            return;
        }
        self.local.insert(key.as_str(), value.clone(), ttl);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(shared) = self.shared.as_ref() {
            if let Err(e) = self.write_shared(shared.as_ref(), key, value, ttl).await {
                self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = shared.name(), error = %e, "shared cache write failed");
            }
        }
    }

    async fn write_shared(
        &self,
        shared: &dyn CacheBackend,
        key: &CacheKey,
        value: &ChatResponse,
        ttl: Duration,
    ) -> Result<()> {
        let entry = SharedEntry {
            value: value.clone(),
            stored_at_ms: now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let data = serde_json::to_string(&entry)?;
        shared.set(&self.prefix_key(key), &data, ttl).await
    }

    pub fn purge_expired(&self) -> usize {
        self.local.purge_expired()
    }

    /// Releases shared-tier connections.
    pub async fn close(&self) -> Result<()> {
        match self.shared.as_ref() {
            Some(shared) => shared.close().await,
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn shared_backend_name(&self) -> Option<&'static str> {
        self.shared.as_ref().map(|s| s.name())
    }

    fn prefix_key(&self, key: &CacheKey) -> String {
        match self.config.key_prefix {
            Some(ref p) => format!("{}:{}", p, key.hash),
            None => key.hash.clone(),
        }
    }
}

/// Periodically drops expired local entries until `cancel` fires.
pub fn spawn_purge_task(
    cache: std::sync::Arc<TieredCache>,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let purge = async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, "purged expired cache entries");
                    }
                }
            }
        }
    };
    tokio::spawn(purge.in_current_span())
}
