use commission_core::provider::{is_token_limit_message, ProviderError};
use std::time::Duration;
use thiserror::Error;

use crate::types::ApiErrorEnvelope;

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("OpenAI API key not found: {0}")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OpenAI API returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Response ended with status {status}: {reason}")]
    Incomplete { status: String, reason: String },

    #[error("Failed to parse response JSON: {0}")]
    JsonParseError(String),
}

impl OpenAiError {
    /// Builds an [`OpenAiError::Api`] from a non-success response body.
    #[must_use]
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let (code, message) = serde_json::from_str::<ApiErrorEnvelope>(body).map_or_else(
            |_| (None, body.trim().to_string()),
            |env| (env.error.code, env.error.message),
        );
        Self::Api {
            status,
            code,
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
                code,
                message,
                retry_after,
            } => {
                let code = code.as_deref().unwrap_or_default();
                match status {
                    // An exhausted quota does not recover by waiting.
                    429 if code == "insufficient_quota" => ProviderError::Client { status, message },
                    429 => ProviderError::RateLimited { retry_after },
                    500..=599 => ProviderError::Server { status, message },
                    400 | 413 if code == "context_length_exceeded" || is_token_limit_message(&message) => {
                        ProviderError::TokenLimitExceeded(message)
                    }
                    413 => ProviderError::TokenLimitExceeded(message),
                    _ => ProviderError::Client { status, message },
                }
            }
            Self::Incomplete { status, reason } => ProviderError::Client {
                status: 200,
                message: format!("{status}: {reason}"),
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

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn api(status: u16, body: &str) -> ProviderError {
        OpenAiError::from_response(status, body, None).into_provider_error(TIMEOUT)
    }

    #[test]
    fn test_context_length_code_is_token_limit() {
        let body = r#"{"error":{"message":"Your input exceeds the context window of this model.","type":"invalid_request_error","param":"input","code":"context_length_exceeded"}}"#;
        assert!(matches!(api(400, body), ProviderError::TokenLimitExceeded(_)));
    }

    #[test]
    fn test_quota_is_not_retried() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        assert!(matches!(api(429, body), ProviderError::Client { status: 429, .. }));
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let retry = Some(Duration::from_millis(1_500));
        let body = r#"{"error":{"message":"Rate limit reached for gpt-5 on tokens per min","type":"tokens","code":"rate_limit_exceeded"}}"#;
        assert_eq!(
            OpenAiError::from_response(429, body, retry).into_provider_error(TIMEOUT),
            ProviderError::RateLimited { retry_after: retry }
        );
    }

    #[test]
    fn test_other_statuses() {
        assert!(matches!(api(503, "unavailable"), ProviderError::Server { status: 503, .. }));
        assert!(matches!(api(401, "bad key"), ProviderError::Client { status: 401, .. }));
        assert!(matches!(api(413, "payload"), ProviderError::TokenLimitExceeded(_)));
    }

    #[test]
    fn test_filtered_response_is_not_retried() {
        let err = OpenAiError::Incomplete {
            status: "incomplete".into(),
            reason: "content_filter".into(),
        };
        let mapped = err.into_provider_error(TIMEOUT);
        assert!(!mapped.is_transient());
        assert!(matches!(mapped, ProviderError::Client { status: 200, .. }));
    }
}
