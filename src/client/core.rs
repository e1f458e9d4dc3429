use super::format::UpstreamFormat;
use super::policy::{Decision, RetryPolicy};
use crate::transport::{HttpTransport, TransportError};
use crate::types::{ChatResponse, NormalizedRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that turns a normalized request into a completion.
///
/// `deadline` bounds the whole call including retries; `cancel` aborts the
/// in-flight attempt and any pending backoff.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn complete(
        &self,
        request: &NormalizedRequest,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ChatResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct CallStats {
    pub calls: u64,
    pub attempts: u64,
    pub failures: u64,
}

/// HTTP upstream client with per-attempt timeout and capped exponential backoff.
pub struct UpstreamClient {
    pub(crate) transport: HttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) format: UpstreamFormat,
    pub(crate) policy: RetryPolicy,
    pub(crate) calls: AtomicU64,
    pub(crate) attempts: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl UpstreamClient {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn format(&self) -> UpstreamFormat {
        self.format
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            calls: self.calls.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    async fn attempt(
        &self,
        request: &NormalizedRequest,
        url: &str,
        body: &serde_json::Value,
        deadline: Instant,
    ) -> Result<ChatResponse> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout("request deadline exceeded"));
        }
        let budget = self.policy.attempt_timeout.min(deadline - now);

        let call = self
            .transport
            .post_json(url, body, self.api_key.as_deref(), budget);
        let reply = tokio::time::timeout(budget, call)
            .await
            .map_err(|_| Error::timeout(format!("upstream attempt exceeded {:?}", budget)))??;

        if !reply.is_success() {
            return Err(Error::Transport(TransportError::Status {
                status: reply.status,
                body: reply.body.chars().take(256).collect(),
            }));
        }
        self.format.parse_response(&reply.body, &request.model_id)
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn complete(
        &self,
        request: &NormalizedRequest,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let url = self.format.endpoint(&self.base_url, &request.model_id);
        let body = self.format.build_body(request);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(attempt, model = %request.model_id, "upstream attempt");

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled("upstream call cancelled"));
                }
                r = self.attempt(request, &url, &body, deadline) => r,
            };

            let err = match result {
                Ok(resp) => {
                    info!(attempt, model = %request.model_id, "upstream call succeeded");
                    return Ok(resp);
                }
                Err(e) => e,
            };
            warn!(attempt, model = %request.model_id, error = %err, "upstream attempt failed");

            let delay = match self.policy.decide(&err, attempt) {
                Decision::Retry { delay } => delay,
                Decision::Fail if err.is_retryable() => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::UpstreamUnavailable {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Decision::Fail => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            };

            if Instant::now() + delay >= deadline {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(Error::UpstreamUnavailable {
                    attempts: attempt,
                    last: Box::new(Error::timeout(format!(
                        "deadline leaves no room for retry after: {}",
                        err
                    ))),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled("upstream call cancelled during backoff"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
