//! Provider boundary
//!
//! The router consumes exactly one capability from each upstream AI vendor:
//! the [`ChatProvider`] trait. Concrete adapters (HTTP clients for each
//! vendor's API) live outside this crate; tests supply mocks.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role ("system", "user", "assistant")
    pub role: String,
    /// Message text
    pub content: String,
    /// Base64 or URL image attachments. Non-empty makes this a vision request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    /// Create a system message
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::with_role("system", content)
    }

    /// Create a user message
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::with_role("user", content)
    }

    /// Create an assistant message
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::with_role("assistant", content)
    }

    fn with_role<S: Into<String>>(role: &str, content: S) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Attach images to this message
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Whether this message carries image attachments
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Per-request options forwarded to the provider adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    /// Model identifier; `None` lets the adapter pick its default
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Advisory request timeout, enforced by the adapter, not the router
    pub timeout_ms: Option<u64>,
}

/// Unified response from a provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    /// Model that actually served the request
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of a provider health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Cumulative usage counters reported by a provider adapter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Callback sink receiving streamed content chunks
pub type ChunkSink = dyn Fn(&str) + Send + Sync;

/// Boundary trait implemented by each upstream AI provider adapter
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider identifier (e.g. "kie", "anthropic")
    fn name(&self) -> &str;

    /// Whether the adapter holds valid credentials and is ready to serve
    fn is_initialized(&self) -> bool;

    /// Whether the provider accepts image-bearing (multimodal) messages
    fn supports_vision(&self) -> bool {
        false
    }

    /// Send a chat request and await the complete response
    async fn send_message(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse>;

    /// Streaming variant. The default delegates to [`Self::send_message`] and
    /// emits the full content as a single chunk.
    async fn send_message_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        on_chunk: &ChunkSink,
    ) -> Result<ChatResponse> {
        let response = self.send_message(messages, options).await?;
        on_chunk(&response.content);
        Ok(response)
    }

    /// Lightweight health probe against the upstream API
    async fn health_check(&self) -> Result<ProviderHealth>;

    /// Cumulative usage counters since the adapter was created
    fn usage_stats(&self) -> ProviderUsage {
        ProviderUsage::default()
    }

    /// Rough token estimate for budgeting before a request is sent
    fn estimate_tokens(&self, text: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
        assert!(!msg.has_images());

        let vision = ChatMessage::user("what is this?").with_images(vec!["data:...".to_string()]);
        assert!(vision.has_images());
    }

    #[test]
    fn test_chat_options_default() {
        let options = ChatOptions::default();
        assert!(options.model.is_none());
        assert!(options.timeout_ms.is_none());
    }

    #[test]
    fn test_message_serde_skips_empty_images() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert!(!json.contains("images"));

        let parsed: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert!(parsed.images.is_empty());
    }
}
