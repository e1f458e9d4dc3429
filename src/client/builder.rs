use super::core::UpstreamClient;
use super::format::UpstreamFormat;
use super::policy::RetryPolicy;
use crate::transport::{HttpTransport, HttpTransportConfig};
use crate::{Error, ErrorContext, Result};
use std::sync::atomic::AtomicU64;
use std::time::Duration;

/// Builder for [`UpstreamClient`].
///
/// The gateway core never reads the environment; credentials and endpoints
/// arrive here from [`crate::config::GatewayConfig`].
pub struct UpstreamClientBuilder {
    base_url: String,
    api_key: Option<String>,
    format: UpstreamFormat,
    policy: RetryPolicy,
    transport: HttpTransportConfig,
}

impl UpstreamClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            format: UpstreamFormat::default(),
            policy: RetryPolicy::default(),
            transport: HttpTransportConfig::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_format(mut self, format: UpstreamFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.policy.max_retries = n;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.policy = self.policy.with_backoff(base, cap);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy.attempt_timeout = timeout;
        self
    }

    /// Route all upstream traffic through a proxy.
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.transport.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_transport_config(mut self, cfg: HttpTransportConfig) -> Self {
        self.transport = cfg;
        self
    }

    pub fn build(self) -> Result<UpstreamClient> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                "invalid upstream base url",
                ErrorContext::new()
                    .with_field_path("upstream.base_url")
                    .with_details(format!("{}: {}", self.base_url, e))
                    .with_source("upstream_builder"),
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                "upstream base url must be http or https",
                ErrorContext::new()
                    .with_field_path("upstream.base_url")
                    .with_details(self.base_url.clone())
                    .with_source("upstream_builder"),
            ));
        }
        if self.policy.attempt_timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "attempt timeout must be positive",
                ErrorContext::new()
                    .with_field_path("upstream.attempt_timeout_ms")
                    .with_source("upstream_builder"),
            ));
        }

        let transport = HttpTransport::new(&self.transport)?;
        Ok(UpstreamClient {
            transport,
            base_url: self.base_url,
            api_key: self.api_key,
            format: self.format,
            policy: self.policy,
            calls: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }
}
