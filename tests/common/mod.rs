//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chat_gateway::cache::{CacheConfig, TieredCache};
use chat_gateway::client::Upstream;
use chat_gateway::gateway::GatewayContext;
use chat_gateway::normalize::{NormalizerConfig, RequestNormalizer};
use chat_gateway::scheduler::{AdmissionScheduler, SchedulerConfig};
use chat_gateway::transport::TransportError;
use chat_gateway::types::{ChatResponse, NormalizedRequest};
use chat_gateway::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// In-process upstream that echoes the last message.
pub struct MockUpstream {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail: bool,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn complete(
        &self,
        request: &NormalizedRequest,
        _deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::info!(model = %request.model_id, "mock upstream call");
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(Error::cancelled("mock aborted")),
        }
        if self.fail {
            return Err(Error::UpstreamUnavailable {
                attempts: 3,
                last: Box::new(Error::Transport(TransportError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                })),
            });
        }
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse::assistant(
            request.model_id.clone(),
            format!("echo: {}", last),
            7,
        ))
    }
}

pub fn context(upstream: Arc<MockUpstream>, scheduler: SchedulerConfig) -> GatewayContext {
    GatewayContext::new(
        RequestNormalizer::new(NormalizerConfig::default()),
        Arc::new(TieredCache::new(CacheConfig::default(), None)),
        AdmissionScheduler::new(scheduler),
        upstream,
    )
}
