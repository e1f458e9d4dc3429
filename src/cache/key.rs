//! Cache key generation.

use crate::types::{ChatMessage, NormalizedRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque fingerprint of (model id, messages). Hex-encoded SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    pub fn for_request(request: &NormalizedRequest) -> Self {
        CacheKeyBuilder::new().build(&request.model_id, &request.messages)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Deterministic key builder.
///
/// Every field is written as `<byte length>:<bytes>` so no choice of content can
/// collide with a different split of the same bytes. The full content of every
/// message is hashed.
/// Namespacing between deployments is done by the cache's key prefix, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, model_id: &str, messages: &[ChatMessage]) -> CacheKey {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, model_id);
        hasher.update(format!("{}#", messages.len()).as_bytes());
        for m in messages {
            write_field(&mut hasher, m.role.as_str());
            write_field(&mut hasher, &m.content);
        }
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
    }
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update(value.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(model: &str, messages: &[ChatMessage]) -> CacheKey {
        CacheKeyBuilder::new().build(model, messages)
    }

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let msgs = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        let a = key("m", &msgs);
        let b = key("m", &msgs.clone());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn differences_past_a_long_prefix_change_the_key() {
        let prefix = "x".repeat(500);
        let a = key("m", &[ChatMessage::user(format!("{}a", prefix))]);
        let b = key("m", &[ChatMessage::user(format!("{}b", prefix))]);
        assert_ne!(a, b);
    }

    #[test]
    fn model_role_and_split_all_matter() {
        let base = key("m", &[ChatMessage::user("ab")]);
        assert_ne!(base, key("n", &[ChatMessage::user("ab")]));
        assert_ne!(base, key("m", &[ChatMessage::assistant("ab")]));
        assert_ne!(
            key("m", &[ChatMessage::user("ab"), ChatMessage::user("c")]),
            key("m", &[ChatMessage::user("a"), ChatMessage::user("bc")])
        );
    }
}
