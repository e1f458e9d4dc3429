//! 类型模块：定义聊天补全网关的核心数据类型。
//!
//! # Types Module
//!
//! Strongly-typed representations of what flows through the gateway: the
//! lenient inbound request, the canonical request handed to the cache and the
//! upstream, and the normalized response returned to clients.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChatMessage`] | Immutable chat message with role and text content |
//! | [`MessageRole`] | `system`, `user` or `assistant` |
//! | [`RawChatRequest`] | Client body as received, every field optional |
//! | [`NormalizedRequest`] | Validated, clamped, alias-resolved request |
//! | [`ChatResponse`] | Normalized completion returned to clients and cached |
//!
//! ## Submodules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`message`] | Message and role types |
//! | [`request`] | Inbound and normalized request types |
//! | [`response`] | Completion response types |
//!
//! ## Example
//!
//! ```rust
//! use chat_gateway::types::{ChatMessage, MessageRole};
//!
//! let system = ChatMessage::system("You are a helpful assistant");
//! let user = ChatMessage::user("What's the weather?");
//! assert_eq!(system.role, MessageRole::System);
//! assert_eq!(user.content, "What's the weather?");
//! ```

pub mod message;
pub mod request;
pub mod response;

pub use message::{ChatMessage, MessageRole};
pub use request::{NormalizedRequest, RawChatRequest};
pub use response::{ChatResponse, Choice, Usage};
