//! Locates the OpenAI API key and endpoint on the host.

use crate::error::OpenAiError;

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Environment variable that overrides the API root.
pub const BASE_URL_ENV_VAR: &str = "OPENAI_BASE_URL";

/// Environment variable holding an optional organization id.
pub const ORGANIZATION_ENV_VAR: &str = "OPENAI_ORG_ID";

/// Locates the API key.
///
/// Resolution order:
/// 1. `explicit` if provided and non-blank.
/// 2. The `OPENAI_API_KEY` environment variable.
///
/// # Errors
///
/// Returns `OpenAiError::MissingApiKey` when neither yields a key.
pub fn discover_api_key(explicit: Option<String>) -> Result<String, OpenAiError> {
    // 1. Explicit key
    if let Some(key) = explicit {
        if key.trim().is_empty() {
            return Err(OpenAiError::MissingApiKey("explicit API key is empty".to_string()));
        }
        return Ok(key);
    }

    // 2. Environment variable
    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(OpenAiError::MissingApiKey(format!(
            "set {API_KEY_ENV_VAR} or pass a key explicitly"
        ))),
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// The API root from `OPENAI_BASE_URL`, if set.
#[must_use]
pub fn discover_base_url() -> Option<String> {
    non_blank_env(BASE_URL_ENV_VAR)
}

/// The organization from `OPENAI_ORG_ID`, if set.
#[must_use]
pub fn discover_organization() -> Option<String> {
    non_blank_env(ORGANIZATION_ENV_VAR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_key() {
        assert_eq!(discover_api_key(Some("sk-test".into())).unwrap(), "sk-test");
        assert!(matches!(
            discover_api_key(Some(String::new())),
            Err(OpenAiError::MissingApiKey(_))
        ));
    }
}
