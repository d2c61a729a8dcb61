//! Claude-backed extractor construction.

use claude_adapter::{discover_api_key, discover_base_url, ClaudeClient, ClaudeConfig, ClaudeError};
use commission_core::extraction::ExtractionConfig;
use commission_core::DocumentExtractor;
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::errors::Error;

/// Creates a Claude client.
///
/// The key comes from `endpoint.api_key_env` when set, otherwise from
/// `ANTHROPIC_API_KEY`. The HTTP timeout follows `extraction.request_timeout_secs`.
///
/// # Errors
///
/// Returns `Error::ClaudeKeyMissing` if no key is available.
pub fn client(endpoint: &EndpointConfig, extraction: &ExtractionConfig) -> Result<ClaudeClient, Error> {
    let key = discover_api_key(endpoint.explicit_key()).map_err(|e| match e {
        ClaudeError::MissingApiKey(_) => Error::ClaudeKeyMissing,
        other => Error::Claude(other),
    })?;
    let mut config = ClaudeConfig::new(key).with_timeout(extraction.request_timeout());
    if let Some(url) = endpoint.base_url.clone().or_else(discover_base_url) {
        config = config.with_base_url(url);
    }
    Ok(ClaudeClient::new(config)?)
}

/// Creates a Claude-backed extractor.
///
/// # Errors
///
/// See [`client`].
pub fn extractor(endpoint: &EndpointConfig, extraction: ExtractionConfig) -> Result<DocumentExtractor, Error> {
    let client = client(endpoint, &extraction)?;
    Ok(DocumentExtractor::new(Arc::new(client), extraction))
}
