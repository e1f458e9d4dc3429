//! Normalized completion response.

use super::message::ChatMessage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u64,
}

impl ChatResponse {
    /// Single assistant choice.
    pub fn assistant(model: impl Into<String>, content: impl Into<String>, total_tokens: u64) -> Self {
        Self {
            choices: vec![Choice {
                message: ChatMessage::assistant(content),
            }],
            model: model.into(),
            usage: Usage { total_tokens },
        }
    }

    /// Text of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Copy of this response reporting `model` instead of the upstream id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
