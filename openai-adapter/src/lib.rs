//! `OpenAI` Responses API provider for commission statement extraction.
//!
//! Page subsets go out as `input_file` parts carrying a base64 `data:` URL;
//! the reply's `output_text` parts are joined and handed to the response
//! parser unchanged.

/// Locating the API key and endpoint.
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

pub use discovery::{discover_api_key, API_KEY_ENV_VAR};
pub use error::OpenAiError;
pub use types::OpenAiConfig;

use types::ResponsesResponse;

/// HTTP client for the `OpenAI` Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: Arc<OpenAiConfig>,
}

impl OpenAiClient {
    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns `OpenAiError::ClientBuild` if the TLS backend cannot be initialized.
    pub fn new(config: OpenAiConfig) -> Result<Self, OpenAiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OpenAiError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Creates a client from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_ORG_ID`.
    ///
    /// # Errors
    ///
    /// Returns `OpenAiError::MissingApiKey` when no key is configured.
    pub fn from_env() -> Result<Self, OpenAiError> {
        let mut config = OpenAiConfig::new(discover_api_key(None)?);
        if let Some(url) = discovery::discover_base_url() {
            config = config.with_base_url(url);
        }
        if let Some(org) = discovery::discover_organization() {
            config = config.with_organization(org);
        }
        Self::new(config)
    }

    /// The active settings.
    #[must_use]
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Sends one request.
    ///
    /// A response cut off by `max_output_tokens` is returned as-is; the
    /// response parser repairs the truncated tail.
    ///
    /// # Errors
    ///
    /// Returns `OpenAiError` on transport failures, non-success statuses,
    /// responses that stopped for reasons other than the output cap, and
    /// undecodable bodies.
    pub async fn send(&self, request: &LlmRequest) -> Result<LlmResponse, OpenAiError> {
        let body = request::build_request(request, &self.config);
        let mut builder = self
            .http
            .post(self.config.responses_url())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = request::retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(
                event = "openai_error_response",
                status = status.as_u16(),
                retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                "openai_error_response"
            );
            return Err(OpenAiError::from_response(status.as_u16(), &text, retry_after));
        }

        let text = response.text().await?;
        let parsed: ResponsesResponse =
            serde_json::from_str(&text).map_err(|e| OpenAiError::JsonParseError(e.to_string()))?;

        match parsed.incomplete_reason() {
            None => {}
            Some("max_output_tokens") => tracing::warn!(
                event = "openai_output_truncated",
                range = %request.page_range,
                max_output_tokens = request.max_output_tokens,
                "openai_output_truncated"
            ),
            Some(reason) => {
                return Err(OpenAiError::Incomplete {
                    status: parsed.status.clone().unwrap_or_default(),
                    reason: reason.to_string(),
                });
            }
        }
        tracing::debug!(
            event = "openai_response",
            model = %parsed.model,
            range = %request.page_range,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "openai_response"
        );

        Ok(LlmResponse {
            text: parsed.output_text(),
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            model: parsed.model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, ProviderError> {
        self.send(&request)
            .await
            .map_err(|e| e.into_provider_error(self.config.timeout))
    }
}
