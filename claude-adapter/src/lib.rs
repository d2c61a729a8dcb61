//! Anthropic Messages API provider for commission statement extraction.
//!
//! This crate sends page-subset PDFs as base64 `document` blocks to
//! `POST /v1/messages` and maps HTTP failures onto the typed
//! [`ProviderError`] values the extraction caller retries, re-splits or
//! gives up on.

/// Resolution of the API key and endpoint.
pub mod discovery;
/// Error types returned by adapter operations.
pub mod error;
/// Request body construction and header helpers.
pub mod request;
/// Client configuration and wire types.
pub mod types;

use async_trait::async_trait;
use commission_core::provider::{LlmProvider, LlmRequest, LlmResponse, ProviderError};
use std::sync::Arc;

pub use discovery::{discover_api_key, discover_base_url, API_KEY_ENV_VAR, BASE_URL_ENV_VAR};
pub use error::ClaudeError;
pub use types::ClaudeConfig;

use types::MessagesResponse;

/// HTTP client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    http: reqwest::Client,
    config: Arc<ClaudeConfig>,
}

impl ClaudeClient {
    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns `ClaudeError::ClientBuild` if the TLS backend cannot be initialized.
    pub fn new(config: ClaudeConfig) -> Result<Self, ClaudeError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClaudeError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Creates a client from `ANTHROPIC_API_KEY` and, if set, `ANTHROPIC_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns `ClaudeError::MissingApiKey` when no key is configured.
    pub fn from_env() -> Result<Self, ClaudeError> {
        let mut config = ClaudeConfig::new(discover_api_key(None)?);
        if let Some(url) = discover_base_url() {
            config = config.with_base_url(url);
        }
        Self::new(config)
    }

    /// The active settings.
    #[must_use]
    pub fn config(&self) -> &ClaudeConfig {
        &self.config
    }

    /// Sends one request and returns the raw result.
    ///
    /// # Errors
    ///
    /// Returns `ClaudeError` on transport failures, non-success statuses and
    /// undecodable bodies.
    pub async fn send(&self, request: &LlmRequest) -> Result<LlmResponse, ClaudeError> {
        let body = request::build_request(request, &self.config);
        let response = self
            .http
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = request::retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(
                event = "claude_error_response",
                status = status.as_u16(),
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "claude_error_response"
            );
            return Err(ClaudeError::from_response(status.as_u16(), &text, retry_after));
        }

        let text = response.text().await?;
        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ClaudeError::JsonParseError(e.to_string()))?;
        tracing::debug!(
            event = "claude_response",
            model = %parsed.model,
            range = %request.page_range,
            input_tokens = parsed.usage.total_input_tokens(),
            output_tokens = parsed.usage.output_tokens,
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
            "claude_response"
        );
        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(
                event = "claude_output_truncated",
                range = %request.page_range,
                max_tokens = request.max_output_tokens,
                "claude_output_truncated"
            );
        }

        Ok(LlmResponse {
            text: parsed.text(),
            input_tokens: parsed.usage.total_input_tokens(),
            output_tokens: parsed.usage.output_tokens,
            model: parsed.model,
        })
    }
}

#[async_trait]
impl LlmProvider for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, ProviderError> {
        self.send(&request)
            .await
            .map_err(|e| e.into_provider_error(self.config.timeout))
    }
}
