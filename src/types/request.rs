//! Inbound and normalized chat-completion requests.

use super::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// Client body exactly as received.
///
/// Every field is optional and `messages` is kept as raw JSON so the
/// normalizer can report precise field paths instead of a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<serde_json::Value>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl RawChatRequest {
    pub fn new(messages: serde_json::Value) -> Self {
        Self {
            messages: Some(messages),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_top_p(mut self, p: f64) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn with_max_tokens(mut self, n: f64) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

/// Validated request. Built once by the normalizer and never mutated.
///
/// `messages[0]` is always a system message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRequest {
    /// Public alias as the client sent it.
    pub requested_model: String,
    /// Upstream model identifier.
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub stream: bool,
}
