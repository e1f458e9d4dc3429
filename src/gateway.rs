//! Per-process pipeline: normalize → key → cache → schedule → upstream → write-back.

use crate::cache::{CacheKey, CacheTier, RedisBackend, TieredCache};
use crate::client::{Upstream, UpstreamClientBuilder};
use crate::config::GatewayConfig;
use crate::normalize::RequestNormalizer;
use crate::scheduler::AdmissionScheduler;
use crate::types::{ChatResponse, RawChatRequest};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit(CacheTier),
    Miss,
}

impl CacheStatus {
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit(_) => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }

    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheStatus::Hit(t) => Some(*t),
            CacheStatus::Miss => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: ChatResponse,
    pub cache: CacheStatus,
}

/// Everything one process needs to serve requests. Built once at startup and
/// shared by reference with every handler.
pub struct GatewayContext {
    pub normalizer: RequestNormalizer,
    pub cache: Arc<TieredCache>,
    pub scheduler: AdmissionScheduler,
    pub upstream: Arc<dyn Upstream>,
    pub request_timeout: Duration,
    pub dev_mode: bool,
    /// Pool slot of this process, attached to every request span.
    pub worker_id: Option<usize>,
}

impl GatewayContext {
    pub fn new(
        normalizer: RequestNormalizer,
        cache: Arc<TieredCache>,
        scheduler: AdmissionScheduler,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            normalizer,
            cache,
            scheduler,
            upstream,
            request_timeout: Duration::from_secs(60),
            dev_mode: false,
            worker_id: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_worker_id(mut self, worker_id: Option<usize>) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Wire up every component from configuration.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        cfg.validate()?;

        let shared = match cfg.cache.redis_url {
            Some(ref url) if cfg.cache.enabled => Some(Box::new(RedisBackend::new(
                url,
                cfg.cache.redis_pool_max,
            )?) as Box<dyn crate::cache::CacheBackend>),
            _ => None,
        };
        let cache = Arc::new(TieredCache::new(cfg.cache_config(), shared));

        let mut upstream = UpstreamClientBuilder::new(cfg.upstream.base_url.clone())
            .with_format(cfg.upstream.format)
            .with_retry_policy(cfg.retry_policy());
        if let Some(ref key) = cfg.upstream.api_key {
            upstream = upstream.with_api_key(key.clone());
        }
        if let Some(ref proxy) = cfg.upstream.proxy {
            upstream = upstream.with_proxy(proxy.clone());
        }

        info!(
            upstream = %cfg.upstream.base_url,
            format = ?cfg.upstream.format,
            shared_cache = cache.shared_backend_name().unwrap_or("none"),
            concurrency = cfg.scheduler.concurrency,
            "gateway context ready"
        );

        Ok(Self::new(
            RequestNormalizer::new(cfg.normalizer_config()),
            cache,
            AdmissionScheduler::new(cfg.scheduler_config()),
            Arc::new(upstream.build()?),
        )
        .with_request_timeout(cfg.request_timeout())
        .with_dev_mode(cfg.server.dev_mode))
    }

    /// Serve one chat-completion request.
    ///
    /// Validation failures return before the scheduler is touched. A cache hit
    /// returns without an upstream call. On a miss the upstream call runs under
    /// the scheduler and the result is written back before replying.
    pub async fn chat(&self, raw: RawChatRequest) -> Result<ChatOutcome> {
        let request = self.normalizer.normalize(raw)?;
        let key = CacheKey::for_request(&request);

        if let Some((cached, tier)) = self.cache.get(&key).await {
            debug!(key = %key, tier = tier.as_str(), "cache hit");
            return Ok(ChatOutcome {
                response: cached.with_model(request.requested_model.clone()),
                cache: CacheStatus::Hit(tier),
            });
        }

        // The scheduler's task timeout may cut the request deadline short.
        let now = Instant::now();
        let request_deadline = now + self.request_timeout;
        let deadline = self
            .scheduler
            .config()
            .effective_deadline(now, Some(request_deadline))
            .unwrap_or(request_deadline);
        let upstream = self.upstream.clone();
        let task_request = request.clone();
        let result = self
            .scheduler
            .submit(0, Some(deadline), move |cancel| async move {
                upstream.complete(&task_request, deadline, cancel).await
            })
            .await?;

        let response = result
            .ok_or_else(|| {
                Error::internal_with_context(
                    "task resolved without a result",
                    ErrorContext::new()
                        .with_details("scheduler timeout behavior is not_found")
                        .with_source("gateway"),
                )
            })?
            .with_model(request.requested_model.clone());

        self.cache.set(&key, &response).await;

        Ok(ChatOutcome {
            response,
            cache: CacheStatus::Miss,
        })
    }

    /// Public model aliases, sorted.
    pub fn models(&self) -> Vec<String> {
        self.normalizer.aliases().map(str::to_string).collect()
    }
}
