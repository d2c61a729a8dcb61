//! The remote model boundary: request/response types, typed provider errors,
//! and the ordered model fallback chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::PageRange;

/// One extraction request sent to a provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Provider model identifier.
    pub model: String,
    /// Instruction text.
    pub prompt: String,
    /// PDF bytes for the requested pages.
    pub document: Vec<u8>,
    /// Pages contained in `document`, for logging and file naming.
    pub page_range: PageRange,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u64,
}

/// A provider's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    /// Concatenated text output.
    pub text: String,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
    /// Model that served the request.
    pub model: String,
}

/// Typed remote failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent overload signal.
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided hint, when present.
        retry_after: Option<Duration>,
    },
    /// No response within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection could not be established or was reset.
    #[error("connection error: {0}")]
    Connection(String),
    /// 5xx response.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Response body or message.
        message: String,
    },
    /// The request is too large for the model's context or the key's budget.
    #[error("token limit exceeded: {0}")]
    TokenLimitExceeded(String),
    /// Any other 4xx rejection.
    #[error("client error {status}: {message}")]
    Client {
        /// HTTP status.
        status: u16,
        /// Response body or message.
        message: String,
    },
}

impl ProviderError {
    /// Timeouts, connection failures and 5xx responses.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Server { .. }
        )
    }
}

/// Phrases providers use when a request is too large.
const TOKEN_LIMIT_MARKERS: &[&str] = &[
    "prompt is too long",
    "too many tokens",
    "context_length_exceeded",
    "maximum context length",
    "exceeds the maximum",
    "input is too long",
    "request too large",
    "too many total text bytes",
];

/// Returns `true` if an error message says the request exceeded a token or size limit.
#[must_use]
pub fn is_token_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TOKEN_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// A remote LLM capable of reading PDF pages.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Performs one request. Implementations must not retry internally.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, ProviderError>;
}

/// Ordered list of models to try, primary first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelChain {
    models: Vec<String>,
}

impl ModelChain {
    /// A chain with a single model.
    #[must_use]
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            models: vec![primary.into()],
        }
    }

    /// Appends a fallback model.
    #[must_use]
    pub fn with_fallback(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !self.models.contains(&model) {
            self.models.push(model);
        }
        self
    }

    /// Returns a chain with `model` moved (or inserted) to the front.
    #[must_use]
    pub fn preferring(&self, model: &str) -> Self {
        let mut models = vec![model.to_string()];
        models.extend(self.models.iter().filter(|m| *m != model).cloned());
        Self { models }
    }

    /// Models in order.
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// First model not in `tried`.
    #[must_use]
    pub fn next_untried(&self, tried: &[String]) -> Option<&str> {
        self.models
            .iter()
            .find(|m| !tried.contains(m))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_limit_messages() {
        assert!(is_token_limit_message("prompt is too long: 212000 tokens > 200000 maximum"));
        assert!(is_token_limit_message("This model's maximum context length is 128000 tokens"));
        assert!(is_token_limit_message("Error code: context_length_exceeded"));
        assert!(!is_token_limit_message("invalid x-api-key"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::Connection("reset".into()).is_transient());
        assert!(ProviderError::Server { status: 529, message: "overloaded".into() }.is_transient());
        assert!(!ProviderError::Client { status: 400, message: "bad".into() }.is_transient());
        assert!(!ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(!ProviderError::TokenLimitExceeded("big".into()).is_transient());
    }

    #[test]
    fn test_model_chain_order() {
        let chain = ModelChain::new("big").with_fallback("small").with_fallback("big");
        assert_eq!(chain.models(), ["big", "small"]);
        assert_eq!(chain.next_untried(&[]), Some("big"));
        assert_eq!(chain.next_untried(&["big".to_string()]), Some("small"));
        assert_eq!(chain.next_untried(&["big".to_string(), "small".to_string()]), None);

        let mini_first = chain.preferring("small");
        assert_eq!(mini_first.models(), ["small", "big"]);
        assert_eq!(chain.preferring("tiny").models(), ["tiny", "big", "small"]);
    }
}
