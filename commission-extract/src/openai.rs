//! `OpenAI`-backed extractor construction.

use commission_core::extraction::ExtractionConfig;
use commission_core::DocumentExtractor;
use openai_adapter::discovery::{discover_base_url, discover_organization};
use openai_adapter::{discover_api_key, OpenAiClient, OpenAiConfig, OpenAiError};
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::errors::Error;

/// Creates an `OpenAI` client.
///
/// The key comes from `endpoint.api_key_env` when set, otherwise from
/// `OPENAI_API_KEY`. The HTTP timeout follows `extraction.request_timeout_secs`.
///
/// # Errors
///
/// Returns `Error::OpenAiKeyMissing` if no key is available.
pub fn client(endpoint: &EndpointConfig, extraction: &ExtractionConfig) -> Result<OpenAiClient, Error> {
    let key = discover_api_key(endpoint.explicit_key()).map_err(|e| match e {
        OpenAiError::MissingApiKey(_) => Error::OpenAiKeyMissing,
        other => Error::OpenAi(other),
    })?;
    let mut config = OpenAiConfig::new(key).with_timeout(extraction.request_timeout());
    if let Some(url) = endpoint.base_url.clone().or_else(discover_base_url) {
        config = config.with_base_url(url);
    }
    if let Some(org) = discover_organization() {
        config = config.with_organization(org);
    }
    Ok(OpenAiClient::new(config)?)
}

/// Creates an `OpenAI`-backed extractor.
///
/// # Errors
///
/// See [`client`].
pub fn extractor(endpoint: &EndpointConfig, extraction: ExtractionConfig) -> Result<DocumentExtractor, Error> {
    let client = client(endpoint, &extraction)?;
    Ok(DocumentExtractor::new(Arc::new(client), extraction))
}
