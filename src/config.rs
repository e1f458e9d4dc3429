//! Gateway configuration.
//!
//! Loaded from YAML with every field defaulted, so an empty file is a valid
//! configuration. Environment overrides are applied by the binary through
//! [`GatewayConfig::apply_env_overrides`]; library code never reads the
//! environment.

use crate::cache::CacheConfig;
use crate::client::{RetryPolicy, UpstreamFormat};
use crate::normalize::{default_model_aliases, NormalizerConfig, DEFAULT_SYSTEM_PROMPT};
use crate::pool::PoolConfig;
use crate::scheduler::{SchedulerConfig, TimeoutBehavior};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelsConfig,
    pub cache: CacheSection,
    pub scheduler: SchedulerSection,
    pub workers: WorkersConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whole-request deadline; on expiry the client gets 408.
    pub request_timeout_ms: u64,
    /// Include internal error detail in 500 responses.
    pub dev_mode: bool,
    /// Wrap the router in a permissive CORS layer.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_ms: 60_000,
            dev_mode: false,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub format: UpstreamFormat,
    pub proxy: Option<String>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-inference.huggingface.co".to_string(),
            api_key: None,
            format: UpstreamFormat::HuggingFace,
            proxy: None,
            max_retries: 2,
            base_delay_ms: 2000,
            max_delay_ms: 8000,
            attempt_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub aliases: BTreeMap<String, String>,
    pub default_model: String,
    pub system_prompt: String,
    pub default_temperature: f64,
    pub default_top_p: f64,
    pub default_max_tokens: u32,
    pub max_tokens_limit: u32,
    pub token_limits: BTreeMap<String, u32>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            aliases: default_model_aliases(),
            default_model: "qwen2.5-72b-instruct".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_temperature: 0.5,
            default_top_p: 0.7,
            default_max_tokens: 2048,
            max_tokens_limit: 8192,
            token_limits: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Enables the shared tier when set.
    pub redis_url: Option<String>,
    pub redis_pool_max: usize,
    pub key_prefix: Option<String>,
    pub purge_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 1000,
            redis_url: None,
            redis_pool_max: 16,
            key_prefix: Some("chat-gateway".to_string()),
            purge_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Per worker process.
    pub concurrency: usize,
    /// Starts per window, per worker. `0` disables.
    pub rate_limit: u32,
    pub window_ms: u64,
    pub task_timeout_ms: Option<u64>,
    pub timeout_behavior: TimeoutBehavior,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit: 0,
            window_ms: 1000,
            task_timeout_ms: None,
            timeout_behavior: TimeoutBehavior::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// `0` means one per available core.
    pub count: usize,
    pub restart_base_delay_ms: u64,
    pub restart_max_delay_ms: u64,
    pub crash_threshold: u32,
    pub breaker_cooldown_ms: u64,
    /// A worker alive at least this long resets its restart backoff.
    pub stable_after_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 0,
            restart_base_delay_ms: 500,
            restart_max_delay_ms: 30_000,
            crash_threshold: 5,
            breaker_cooldown_ms: 60_000,
            stable_after_ms: 10_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn config_error(msg: &str, field: &str, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("gateway_config"),
    )
}

impl GatewayConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(s).map_err(|e| config_error("invalid configuration", "", e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_error(
                "cannot read configuration file",
                "",
                format!("{}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply `CHAT_GATEWAY_*` overrides from `lookup` (usually `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| config_error("invalid environment override", key, value.clone()))
        }

        if let Some(v) = lookup("CHAT_GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_PORT") {
            self.server.port = parse("CHAT_GATEWAY_PORT", v)?;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_DEV_MODE") {
            self.server.dev_mode = parse("CHAT_GATEWAY_DEV_MODE", v)?;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_UPSTREAM_URL") {
            self.upstream.base_url = v;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_API_KEY") {
            self.upstream.api_key = Some(v);
        }
        if let Some(v) = lookup("CHAT_GATEWAY_PROXY") {
            self.upstream.proxy = Some(v);
        }
        if let Some(v) = lookup("CHAT_GATEWAY_REDIS_URL") {
            self.cache.redis_url = Some(v);
        }
        if let Some(v) = lookup("CHAT_GATEWAY_WORKERS") {
            self.workers.count = parse("CHAT_GATEWAY_WORKERS", v)?;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_CONCURRENCY") {
            self.scheduler.concurrency = parse("CHAT_GATEWAY_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("CHAT_GATEWAY_LOG") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout_ms == 0 {
            return Err(config_error("must be positive", "server.request_timeout_ms", "0"));
        }
        url::Url::parse(&self.upstream.base_url).map_err(|e| {
            config_error(
                "invalid url",
                "upstream.base_url",
                format!("{}: {}", self.upstream.base_url, e),
            )
        })?;
        if self.upstream.attempt_timeout_ms == 0 {
            return Err(config_error("must be positive", "upstream.attempt_timeout_ms", "0"));
        }
        if self.scheduler.concurrency == 0 {
            return Err(config_error("must be at least 1", "scheduler.concurrency", "0"));
        }
        if self.scheduler.rate_limit > 0 && self.scheduler.window_ms == 0 {
            return Err(config_error("must be positive when rate_limit is set", "scheduler.window_ms", "0"));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(config_error("must be at least 1", "cache.max_entries", "0"));
        }
        if self.models.max_tokens_limit == 0 {
            return Err(config_error("must be at least 1", "models.max_tokens_limit", "0"));
        }
        if let Some(ref url) = self.cache.redis_url {
            url::Url::parse(url)
                .map_err(|e| config_error("invalid url", "cache.redis_url", e.to_string()))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        let m = &self.models;
        NormalizerConfig {
            aliases: m.aliases.clone(),
            default_model: m.default_model.clone(),
            system_prompt: m.system_prompt.clone(),
            default_temperature: m.default_temperature,
            default_top_p: m.default_top_p,
            default_max_tokens: m.default_max_tokens,
            max_tokens_limit: m.max_tokens_limit,
            model_token_limits: m.token_limits.clone(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let mut cfg = CacheConfig::new()
            .with_enabled(self.cache.enabled)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_max_entries(self.cache.max_entries);
        if let Some(ref p) = self.cache.key_prefix {
            cfg = cfg.with_key_prefix(p.clone());
        }
        cfg
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        let mut cfg = SchedulerConfig::new()
            .with_concurrency(s.concurrency)
            .with_rate_limit(s.rate_limit, Duration::from_millis(s.window_ms))
            .with_timeout_behavior(s.timeout_behavior);
        if let Some(ms) = s.task_timeout_ms {
            cfg = cfg.with_task_timeout(Duration::from_millis(ms));
        }
        cfg
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let u = &self.upstream;
        RetryPolicy::new()
            .with_max_retries(u.max_retries)
            .with_backoff(
                Duration::from_millis(u.base_delay_ms),
                Duration::from_millis(u.max_delay_ms),
            )
            .with_attempt_timeout(Duration::from_millis(u.attempt_timeout_ms))
    }

    /// Concurrency bound across all workers: per-worker concurrency times the
    /// effective worker count.
    pub fn system_concurrency(&self) -> usize {
        self.scheduler.concurrency * crate::pool::worker_count(self.workers.count)
    }

    pub fn pool_config(&self) -> PoolConfig {
        let w = &self.workers;
        PoolConfig {
            workers: w.count,
            restart_base_delay: Duration::from_millis(w.restart_base_delay_ms),
            restart_max_delay: Duration::from_millis(w.restart_max_delay_ms),
            crash_threshold: w.crash_threshold.max(1),
            breaker_cooldown: Duration::from_millis(w.breaker_cooldown_ms),
            stable_after: Duration::from_millis(w.stable_after_ms),
            shutdown_grace: Duration::from_millis(w.shutdown_grace_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.workers.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg = GatewayConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.request_timeout_ms, 60_000);
        assert_eq!(cfg.upstream.max_retries, 2);
        assert_eq!(cfg.scheduler.concurrency, 5);
        assert_eq!(cfg.models.aliases.len(), 7);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = GatewayConfig::from_yaml_str(
            r#"
server:
  port: 8080
upstream:
  base_url: "http://localhost:9000/v1"
  format: openai
scheduler:
  concurrency: 2
  timeout_behavior: not_found
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.upstream.format, UpstreamFormat::OpenAi);
        assert_eq!(cfg.scheduler.timeout_behavior, TimeoutBehavior::NotFound);
        assert_eq!(cfg.scheduler_config().concurrency, 2);
        assert_eq!(cfg.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = [
            ("CHAT_GATEWAY_PORT", "9999"),
            ("CHAT_GATEWAY_API_KEY", "secret"),
            ("CHAT_GATEWAY_WORKERS", "3"),
        ]
        .into_iter()
        .collect();
        let mut cfg = GatewayConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.upstream.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.workers.count, 3);

        let err = cfg
            .apply_env_overrides(|k| (k == "CHAT_GATEWAY_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("CHAT_GATEWAY_PORT")
        );
    }

    #[test]
    fn system_concurrency_multiplies_by_workers() {
        let mut cfg = GatewayConfig::default();
        cfg.scheduler.concurrency = 5;
        cfg.workers.count = 4;
        assert_eq!(cfg.system_concurrency(), 20);
        cfg.workers.count = 1;
        assert_eq!(cfg.system_concurrency(), 5);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = GatewayConfig::default();
        cfg.upstream.base_url = "::not a url".into();
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default();
        cfg.scheduler.concurrency = 0;
        assert!(cfg.validate().is_err());
    }
}
