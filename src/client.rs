//! Upstream client: one chat completion per call, with timeout and retry/backoff.
//!
//! Keep the public surface small: build an [`UpstreamClient`] with
//! [`UpstreamClientBuilder`] and use it through the [`Upstream`] trait.
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
pub mod format;
mod policy;

pub use builder::UpstreamClientBuilder;
pub use core::{CallStats, Upstream, UpstreamClient};
pub use format::UpstreamFormat;
pub use policy::RetryPolicy;
