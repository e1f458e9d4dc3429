//! Request normalization: validation, clamping, alias resolution and system prompt injection.
//!
//! Pure and synchronous. Every rejection is an [`Error::InvalidRequest`] carrying the
//! offending field path so the HTTP layer can return it verbatim.

use crate::types::{ChatMessage, MessageRole, NormalizedRequest, RawChatRequest};
use crate::{Error, ErrorContext, Result};
use std::collections::BTreeMap;

/// Bounds keeping `top_p` inside the open interval (0, 1).
pub const TOP_P_MIN: f64 = 0.0001;
pub const TOP_P_MAX: f64 = 0.9999;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Public alias → upstream model id, as served by `GET /v1/models`.
pub fn default_model_aliases() -> BTreeMap<String, String> {
    [
        ("qwen2.5-72b-instruct", "Qwen/Qwen2.5-72B-Instruct"),
        ("gemma2-2b-it", "google/gemma-2-2b-it"),
        ("gemma2-27b-it", "google/gemma-2-27b-it"),
        ("llama-3-8b-instruct", "meta-llama/Meta-Llama-3-8B-Instruct"),
        ("llama-3.2-1b-instruct", "meta-llama/Llama-3.2-1B-Instruct"),
        ("llama-3.2-3b-instruct", "meta-llama/Llama-3.2-3B-Instruct"),
        ("phi-3.5", "microsoft/Phi-3.5-mini-instruct"),
    ]
    .into_iter()
    .map(|(a, m)| (a.to_string(), m.to_string()))
    .collect()
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub aliases: BTreeMap<String, String>,
    /// Alias used when the request names no model.
    pub default_model: String,
    pub system_prompt: String,
    pub default_temperature: f64,
    pub default_top_p: f64,
    pub default_max_tokens: u32,
    /// Upper bound for `max_tokens` when the model has no entry in `model_token_limits`.
    pub max_tokens_limit: u32,
    /// Per upstream model id.
    pub model_token_limits: BTreeMap<String, u32>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            aliases: default_model_aliases(),
            default_model: "qwen2.5-72b-instruct".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_temperature: 0.5,
            default_top_p: 0.7,
            default_max_tokens: 2048,
            max_tokens_limit: 8192,
            model_token_limits: BTreeMap::new(),
        }
    }
}

impl NormalizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, alias: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), model_id.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens_limit(mut self, limit: u32) -> Self {
        self.max_tokens_limit = limit;
        self
    }

    pub fn with_model_token_limit(mut self, model_id: impl Into<String>, limit: u32) -> Self {
        self.model_token_limits.insert(model_id.into(), limit);
        self
    }
}

pub struct RequestNormalizer {
    cfg: NormalizerConfig,
}

impl RequestNormalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Self { cfg }
    }

    /// Public aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.cfg.aliases.keys().map(String::as_str)
    }

    /// Upstream id for `alias`; unknown aliases pass through unchanged.
    pub fn resolve_model<'a>(&'a self, alias: &'a str) -> &'a str {
        self.cfg
            .aliases
            .get(alias)
            .map(String::as_str)
            .unwrap_or(alias)
    }

    pub fn token_limit(&self, model_id: &str) -> u32 {
        self.cfg
            .model_token_limits
            .get(model_id)
            .copied()
            .unwrap_or(self.cfg.max_tokens_limit)
            .max(1)
    }

    pub fn normalize(&self, raw: RawChatRequest) -> Result<NormalizedRequest> {
        let mut messages = parse_messages(raw.messages.as_ref())?;

        let requested_model = raw
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.cfg.default_model.clone());
        let model_id = self.resolve_model(&requested_model).to_string();

        let temperature = finite(raw.temperature)
            .unwrap_or(self.cfg.default_temperature)
            .clamp(0.0, 1.0);
        let top_p = finite(raw.top_p)
            .unwrap_or(self.cfg.default_top_p)
            .clamp(TOP_P_MIN, TOP_P_MAX);

        let limit = self.token_limit(&model_id);
        let max_tokens = match finite(raw.max_tokens) {
            Some(n) => n.floor().clamp(1.0, limit as f64) as u32,
            None => self.cfg.default_max_tokens.clamp(1, limit),
        };

        if messages[0].role != MessageRole::System {
            messages.insert(0, ChatMessage::system(self.cfg.system_prompt.clone()));
        }

        Ok(NormalizedRequest {
            requested_model,
            model_id,
            messages,
            temperature,
            top_p,
            max_tokens,
            stream: raw.stream.unwrap_or(false),
        })
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn invalid(msg: impl Into<String>, field: impl Into<String>) -> Error {
    Error::invalid_request_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("normalizer"),
    )
}

fn parse_messages(value: Option<&serde_json::Value>) -> Result<Vec<ChatMessage>> {
    let items = match value {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => items,
        Some(serde_json::Value::Array(_)) | None | Some(serde_json::Value::Null) => {
            return Err(invalid(
                "messages must be a non-empty array",
                "messages",
            ))
        }
        Some(_) => return Err(invalid("messages must be an array", "messages")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| invalid("message must be an object", format!("messages[{}]", i)))?;
            let role = obj
                .get("role")
                .and_then(|r| r.as_str())
                .and_then(MessageRole::parse)
                .ok_or_else(|| {
                    invalid(
                        "role must be one of system, user, assistant",
                        format!("messages[{}].role", i),
                    )
                })?;
            let content = obj
                .get("content")
                .and_then(|c| c.as_str())
                .ok_or_else(|| {
                    invalid("content must be a string", format!("messages[{}].content", i))
                })?;
            Ok(ChatMessage::new(role, content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> RequestNormalizer {
        RequestNormalizer::new(NormalizerConfig::default())
    }

    fn hello() -> serde_json::Value {
        json!([{"role": "user", "content": "hello"}])
    }

    #[test]
    fn clamps_sampling_parameters() {
        let n = normalizer();
        let req = n
            .normalize(RawChatRequest::new(hello()).with_top_p(1.5).with_temperature(5.0))
            .unwrap();
        assert_eq!(req.top_p, 0.9999);
        assert_eq!(req.temperature, 1.0);

        let req = n
            .normalize(RawChatRequest::new(hello()).with_top_p(0.0).with_temperature(-2.0))
            .unwrap();
        assert_eq!(req.top_p, 0.0001);
        assert_eq!(req.temperature, 0.0);
    }

    #[test]
    fn clamps_max_tokens_to_model_limit() {
        let n = RequestNormalizer::new(
            NormalizerConfig::new()
                .with_max_tokens_limit(4096)
                .with_model_token_limit("microsoft/Phi-3.5-mini-instruct", 1024),
        );
        let req = n
            .normalize(RawChatRequest::new(hello()).with_max_tokens(100_000.0))
            .unwrap();
        assert_eq!(req.max_tokens, 4096);

        let req = n
            .normalize(
                RawChatRequest::new(hello())
                    .with_model("phi-3.5")
                    .with_max_tokens(100_000.0),
            )
            .unwrap();
        assert_eq!(req.max_tokens, 1024);

        let req = n
            .normalize(RawChatRequest::new(hello()).with_max_tokens(0.0))
            .unwrap();
        assert_eq!(req.max_tokens, 1);
    }

    #[test]
    fn applies_defaults() {
        let req = normalizer().normalize(RawChatRequest::new(hello())).unwrap();
        assert_eq!(req.temperature, 0.5);
        assert_eq!(req.top_p, 0.7);
        assert_eq!(req.max_tokens, 2048);
        assert!(!req.stream);
        assert_eq!(req.requested_model, "qwen2.5-72b-instruct");
        assert_eq!(req.model_id, "Qwen/Qwen2.5-72B-Instruct");
    }

    #[test]
    fn non_finite_numbers_fall_back_to_defaults() {
        let req = normalizer()
            .normalize(RawChatRequest::new(hello()).with_temperature(f64::NAN))
            .unwrap();
        assert_eq!(req.temperature, 0.5);
    }

    #[test]
    fn resolves_aliases_and_passes_unknown_through() {
        let n = normalizer();
        let req = n
            .normalize(RawChatRequest::new(hello()).with_model("gemma2-2b-it"))
            .unwrap();
        assert_eq!(req.model_id, "google/gemma-2-2b-it");
        assert_eq!(req.requested_model, "gemma2-2b-it");

        let req = n
            .normalize(RawChatRequest::new(hello()).with_model("org/custom-model"))
            .unwrap();
        assert_eq!(req.model_id, "org/custom-model");
    }

    #[test]
    fn prepends_system_prompt_only_when_missing() {
        let n = normalizer();
        let req = n.normalize(RawChatRequest::new(hello())).unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0], ChatMessage::system(DEFAULT_SYSTEM_PROMPT));

        let req = n
            .normalize(RawChatRequest::new(json!([
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ])))
            .unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "be terse");
    }

    #[test]
    fn rejects_missing_or_empty_messages() {
        let n = normalizer();
        for raw in [RawChatRequest::default(), RawChatRequest::new(json!([]))] {
            let err = n.normalize(raw).unwrap_err();
            assert_eq!(err.status_code(), 400);
            assert_eq!(
                err.context().and_then(|c| c.field_path.as_deref()),
                Some("messages")
            );
        }
    }

    #[test]
    fn rejects_bad_roles_and_content() {
        let n = normalizer();
        let err = n
            .normalize(RawChatRequest::new(json!([
                {"role": "user", "content": "a"},
                {"role": "tool", "content": "b"}
            ])))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("messages[1].role")
        );

        let err = n
            .normalize(RawChatRequest::new(json!([{"role": "user", "content": 42}])))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("messages[0].content")
        );
    }
}
