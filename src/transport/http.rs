use crate::{Error, ErrorContext, Result};
use reqwest::Proxy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Outbound proxy for all upstream traffic (`http://` or `https://`).
    pub proxy_url: Option<String>,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Raw reply from one POST: status plus the undecoded body.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One pooled reqwest client shared by every upstream attempt in the process.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &HttpTransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Some(cfg.pool_idle_timeout));

        if let Some(ref proxy_url) = cfg.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    "invalid proxy url",
                    ErrorContext::new()
                        .with_field_path("upstream.proxy")
                        .with_details(e.to_string())
                        .with_source("http_transport"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    /// POST `body` as JSON. Any HTTP status is returned as a reply; only
    /// connection-level failures and the per-call `timeout` are errors.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let mut req = self.client.post(url).json(body).timeout(timeout);
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(HttpReply { status, body })
    }
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("upstream attempt timed out: {}", e))
    } else {
        Error::Transport(TransportError::Http(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Other(String),
}
