//! # chat-gateway
//!
//! 面向聊天补全服务的网关：请求规范化、两级缓存、准入调度、重试上游调用与多进程工作池。
//!
//! An HTTP gateway in front of a chat-completion provider. It normalizes client
//! requests, answers repeats from a two-tier cache, bounds and rate-limits the
//! upstream calls it makes, and retries transient upstream failures.
//!
//! ## Request flow
//!
//! 1. [`normalize`] validates the raw body and fills defaults.
//! 2. [`cache::CacheKey`] derives a deterministic key from model and messages.
//! 3. [`cache::TieredCache`] answers from the local tier, then the shared tier.
//! 4. On a miss, [`scheduler::AdmissionScheduler`] admits the call under a
//!    concurrency bound and a start-rate window.
//! 5. [`client::UpstreamClient`] performs the call with per-attempt timeouts
//!    and capped exponential backoff.
//! 6. The response is written back to both cache tiers and returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chat_gateway::config::GatewayConfig;
//! use chat_gateway::gateway::GatewayContext;
//! use chat_gateway::types::RawChatRequest;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> chat_gateway::Result<()> {
//!     let cfg = GatewayConfig::from_yaml_str("upstream:\n  api_key: secret\n")?;
//!     let ctx = GatewayContext::from_config(&cfg)?;
//!
//!     let raw = RawChatRequest::new(json!([{ "role": "user", "content": "Hello" }]))
//!         .with_model("qwen-72b");
//!     let outcome = ctx.chat(raw).await?;
//!     println!(
//!         "{} ({})",
//!         outcome.response.content().unwrap_or_default(),
//!         outcome.cache.header_value()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Messages, raw and normalized requests, responses |
//! | [`normalize`] | Request validation, alias resolution and clamping |
//! | [`cache`] | Cache keys, local LRU tier, shared Redis tier |
//! | [`client`] | Upstream client with timeout and retry |
//! | [`transport`] | Pooled HTTP transport |
//! | [`resilience`] | Backoff, start window, circuit breaker |
//! | [`scheduler`] | Priority admission scheduler |
//! | [`gateway`] | Per-process request pipeline |
//! | [`server`] | axum routes and error mapping |
//! | [`pool`] | Multi-process worker supervisor |
//! | [`shutdown`] | Ordered graceful shutdown |
//! | [`config`] | YAML configuration and env overrides |
//! | [`telemetry`] | Logging setup |

pub mod cache;
pub mod client;
pub mod config;
pub mod gateway;
pub mod normalize;
pub mod pool;
pub mod resilience;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use cache::{CacheKey, TieredCache};
pub use client::{Upstream, UpstreamClient, UpstreamClientBuilder};
pub use config::GatewayConfig;
pub use gateway::{CacheStatus, ChatOutcome, GatewayContext};
pub use normalize::RequestNormalizer;
pub use scheduler::AdmissionScheduler;
pub use shutdown::ShutdownCoordinator;
pub use types::{ChatMessage, ChatResponse, MessageRole, NormalizedRequest, RawChatRequest};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
