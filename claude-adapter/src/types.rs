//! Client configuration and Messages API wire types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// `anthropic-version` header value.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Connection settings for [`ClaudeClient`](crate::ClaudeClient).
#[derive(Clone)]
pub struct ClaudeConfig {
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// API host, without the `/v1/messages` path.
    pub base_url: String,
    /// `anthropic-version` header.
    pub api_version: String,
    /// HTTP-level timeout for one request.
    pub timeout: Duration,
    /// Sampling temperature; `None` leaves the API default.
    pub temperature: Option<f64>,
}

impl ClaudeConfig {
    /// Settings for `api_key` with the public endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(300),
            temperature: Some(0.0),
        }
    }

    /// Override the API host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full Messages endpoint URL.
    #[must_use]
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// `POST /v1/messages` body.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    /// Model identifier.
    pub model: String,
    /// Output token cap.
    pub max_tokens: u64,
    /// Conversation turns; always one user turn here.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// `user` or `assistant`.
    pub role: &'static str,
    /// Content blocks in order.
    pub content: Vec<ContentBlock>,
}

/// Request content block.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// An attached document.
    Document {
        /// Where the document bytes come from.
        source: DocumentSource,
    },
    /// Instruction text.
    Text {
        /// The text.
        text: String,
    },
}

/// Inline document payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentSource {
    /// Base64-encoded bytes.
    Base64 {
        /// MIME type, `application/pdf`.
        media_type: &'static str,
        /// Encoded bytes.
        data: String,
    },
}

/// Successful Messages response.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    /// Model that served the request.
    pub model: String,
    /// Output blocks.
    pub content: Vec<ResponseBlock>,
    /// Why generation stopped (`end_turn`, `max_tokens`, ...).
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Billed tokens.
    pub usage: Usage,
}

impl MessagesResponse {
    /// All text blocks joined in order.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Response content block; only text is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    /// Generated text.
    Text {
        /// The text.
        text: String,
    },
    /// Thinking, tool use and future block types.
    #[serde(other)]
    Other,
}

/// Token accounting.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    /// Uncached input tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    /// Every input token counted against the per-minute budget.
    #[must_use]
    pub fn total_input_tokens(&self) -> u64 {
        self.input_tokens
            + self.cache_creation_input_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0)
    }
}

/// `{"type":"error","error":{...}}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    /// The error detail.
    pub error: ApiErrorBody,
}

/// Error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error type such as `rate_limit_error` or `overloaded_error`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}
