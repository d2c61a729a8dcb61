use commission_core::provider::{is_token_limit_message, ProviderError};
use std::time::Duration;
use thiserror::Error;

use crate::types::ApiErrorEnvelope;

#[derive(Debug, Error)]
pub enum ClaudeError {
    #[error("Anthropic API key not found: {0}")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Anthropic API returned {status} ({error_type}): {message}")]
    Api {
        status: u16,
        error_type: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Failed to parse response JSON: {0}")]
    JsonParseError(String),
}

impl ClaudeError {
    /// Builds an [`ClaudeError::Api`] from a non-success response body.
    #[must_use]
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let (error_type, message) = serde_json::from_str::<ApiErrorEnvelope>(body).map_or_else(
            |_| ("unknown".to_string(), body.trim().to_string()),
            |env| (env.error.kind, env.error.message),
        );
        Self::Api {
            status,
            error_type,
            message,
            retry_after,
        }
    }

    /// Maps an adapter error onto the typed failures the extraction caller understands.
    #[must_use]
    pub fn into_provider_error(self, request_timeout: Duration) -> ProviderError {
        match self {
            Self::Request(e) if e.is_timeout() => ProviderError::Timeout(request_timeout),
            Self::Request(e) => ProviderError::Connection(e.to_string()),
            Self::Api {
                status,
                error_type,
                message,
                retry_after,
            } => match status {
                429 => ProviderError::RateLimited { retry_after },
                413 => ProviderError::TokenLimitExceeded(message),
                // 529 is Anthropic's "overloaded".
                500..=599 => ProviderError::Server { status, message },
                400 if error_type == "request_too_large" || is_token_limit_message(&message) => {
                    ProviderError::TokenLimitExceeded(message)
                }
                _ => ProviderError::Client { status, message },
            },
            Self::JsonParseError(message) => ProviderError::Server {
                status: 502,
                message,
            },
            Self::MissingApiKey(message) | Self::ClientBuild(message) => {
                ProviderError::Client { status: 0, message }
            }
        }
    }
}
