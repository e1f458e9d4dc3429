//! 弹性模式模块：退避、启动窗口限流与熔断器。
//!
//! # Resilience Primitives Module
//!
//! Small, synchronous building blocks shared by the upstream client, the
//! admission scheduler and the worker pool.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`backoff`] | Capped exponential backoff used for upstream retries and worker restarts |
//! | [`rate_limiter`] | Fixed-window start limiter used by the admission scheduler |
//! | [`circuit_breaker`] | Consecutive-failure breaker guarding worker restart loops |
//!
//! ## Backoff
//!
//! ```rust
//! use chat_gateway::resilience::backoff::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::new(Duration::from_millis(2000), Duration::from_millis(8000));
//! assert_eq!(backoff.delay(1), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(4000));
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use chat_gateway::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//! if breaker.allow().is_ok() {
//!     // restart the worker...
//!     breaker.on_success();
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use rate_limiter::{StartWindow, StartWindowConfig, StartWindowSnapshot};
