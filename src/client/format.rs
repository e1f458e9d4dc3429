//! Upstream wire formats: request body construction and response parsing.

use crate::types::{ChatMessage, ChatResponse, Choice, MessageRole, NormalizedRequest, Usage};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamFormat {
    /// `POST {base}/chat/completions`, OpenAI-compatible body and response.
    #[default]
    OpenAi,
    /// `POST {base}/models/{model}`, text-generation inference body.
    HuggingFace,
}

impl UpstreamFormat {
    pub fn endpoint(&self, base_url: &str, model_id: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            UpstreamFormat::OpenAi => format!("{}/chat/completions", base),
            UpstreamFormat::HuggingFace => format!("{}/models/{}", base, model_id),
        }
    }

    /// Upstream calls are always non-streaming.
    pub fn build_body(&self, req: &NormalizedRequest) -> Value {
        match self {
            UpstreamFormat::OpenAi => json!({
                "model": req.model_id,
                "messages": req.messages,
                "temperature": req.temperature,
                "top_p": req.top_p,
                "max_tokens": req.max_tokens,
                "stream": false,
            }),
            UpstreamFormat::HuggingFace => {
                let inputs = req
                    .messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                json!({
                    "inputs": inputs,
                    "parameters": {
                        "temperature": req.temperature,
                        "max_new_tokens": req.max_tokens,
                        "top_p": req.top_p,
                        "do_sample": true,
                        "return_full_text": false,
                    }
                })
            }
        }
    }

    pub fn parse_response(&self, body: &str, model_id: &str) -> Result<ChatResponse> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| malformed("response body is not JSON", "body", e.to_string()))?;
        match self {
            UpstreamFormat::OpenAi => parse_openai(&value, model_id),
            UpstreamFormat::HuggingFace => parse_huggingface(&value, model_id),
        }
    }
}

fn malformed(msg: &str, field: &str, details: impl Into<String>) -> Error {
    Error::malformed_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("upstream_format"),
    )
}

fn parse_openai(value: &Value, model_id: &str) -> Result<ChatResponse> {
    let choices = value
        .get("choices")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| malformed("missing choices", "choices", value.to_string()))?;

    let parsed = choices
        .iter()
        .enumerate()
        .map(|(i, choice)| {
            let message = choice.get("message").ok_or_else(|| {
                malformed("missing message", &format!("choices[{}].message", i), "")
            })?;
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    malformed(
                        "message content must be a string",
                        &format!("choices[{}].message.content", i),
                        "",
                    )
                })?;
            let role = message
                .get("role")
                .and_then(Value::as_str)
                .and_then(MessageRole::parse)
                .unwrap_or(MessageRole::Assistant);
            Ok(Choice {
                message: ChatMessage::new(role, content),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total_tokens = value
        .pointer("/usage/total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let model = value
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(model_id);

    Ok(ChatResponse {
        choices: parsed,
        model: model.to_string(),
        usage: Usage { total_tokens },
    })
}

fn parse_huggingface(value: &Value, model_id: &str) -> Result<ChatResponse> {
    let item = match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| malformed("empty generation list", "[0]", ""))?,
        other => other,
    };
    let text = item
        .get("generated_text")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing generated_text", "generated_text", value.to_string()))?;
    Ok(ChatResponse::assistant(model_id, text, 0))
}
