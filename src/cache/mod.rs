//! 响应缓存模块：本地缓存层加可选共享缓存层，先于上游调用查询。
//!
//! # Response Caching Module
//!
//! Two-tier cache consulted before any upstream call. Repeated requests are
//! answered from the process-local tier; workers share results through an
//! optional cross-process tier (Redis).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TieredCache`] | Local tier in front of an optional shared tier, with statistics |
//! | [`CacheConfig`] | TTL, capacity and key prefix |
//! | [`CacheKey`] / [`CacheKeyBuilder`] | Deterministic SHA-256 fingerprint of model and messages |
//! | [`LocalCache`] | Bounded, TTL-evicting process-private store |
//! | [`CacheBackend`] | Trait for shared-tier stores |
//! | [`MemoryBackend`] | In-process shared tier |
//! | [`RedisBackend`] | Redis shared tier |
//!
//! ## Example
//!
//! ```rust
//! use chat_gateway::cache::{CacheConfig, CacheKeyBuilder, TieredCache};
//! use chat_gateway::types::ChatMessage;
//! use std::time::Duration;
//!
//! // Local tier only, 1-hour TTL, at most 1000 entries
//! let config = CacheConfig::new()
//!     .with_ttl(Duration::from_secs(3600))
//!     .with_max_entries(1000);
//! let cache = TieredCache::new(config, None);
//!
//! let key = CacheKeyBuilder::new().build("Qwen/Qwen2.5-72B-Instruct", &[ChatMessage::user("hi")]);
//! assert_eq!(key.as_str().len(), 64);
//! # let _ = cache;
//! ```
//!
//! ## Semantics
//!
//! - `get`: local hit returns; a shared hit is copied into the local tier with
//!   its remaining TTL.
//! - `set`: write-through to both tiers.
//! - Entries are replaced whole, never mutated in place.

mod backend;
mod key;
mod local;
mod manager;
mod redis;

pub use backend::{CacheBackend, MemoryBackend};
pub use key::{CacheKey, CacheKeyBuilder};
pub use local::LocalCache;
pub use manager::{spawn_purge_task, CacheConfig, CacheStats, CacheTier, TieredCache};
pub use redis::RedisBackend;
