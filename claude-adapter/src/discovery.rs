//! Resolution of the Anthropic API key and endpoint.

use crate::error::ClaudeError;

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable that overrides the API host.
pub const BASE_URL_ENV_VAR: &str = "ANTHROPIC_BASE_URL";

/// Locates the API key.
///
/// Resolution order:
/// 1. `explicit` if provided and non-blank.
/// 2. The `ANTHROPIC_API_KEY` environment variable.
///
/// # Errors
///
/// Returns `ClaudeError::MissingApiKey` when neither yields a key.
pub fn discover_api_key(explicit: Option<String>) -> Result<String, ClaudeError> {
    if let Some(key) = explicit {
        if key.trim().is_empty() {
            return Err(ClaudeError::MissingApiKey(
                "explicit API key is empty".to_string(),
            ));
        }
        return Ok(key);
    }

    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ClaudeError::MissingApiKey(format!(
            "set {API_KEY_ENV_VAR} or pass a key explicitly"
        ))),
    }
}

/// The API host from `ANTHROPIC_BASE_URL`, if set.
#[must_use]
pub fn discover_base_url() -> Option<String> {
    std::env::var(BASE_URL_ENV_VAR)
        .ok()
        .filter(|url| !url.trim().is_empty())
}
