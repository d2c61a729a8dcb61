//! Settings file loading.
//!
//! A TOML file may pick the provider, override any section of the
//! extraction config, and point each provider at a different endpoint or
//! key variable:
//!
//! ```toml
//! provider = "openai"
//!
//! [extraction]
//! min_coverage = 0.8
//! deadline_secs = 900
//!
//! [extraction.chunking]
//! max_chunk_size = 6
//!
//! [openai]
//! api_key_env = "COMMISSIONS_OPENAI_KEY"
//! ```
//!
//! Sections that are not mentioned keep the chosen provider's defaults.

use commission_core::extraction::ExtractionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::Error;

/// Which remote API performs the extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    #[default]
    Claude,
    /// `OpenAI` Responses API.
    Openai,
}

impl ProviderKind {
    /// Built-in extraction defaults for this provider.
    #[must_use]
    pub fn default_extraction(self) -> ExtractionConfig {
        match self {
            Self::Claude => ExtractionConfig::claude(),
            Self::Openai => ExtractionConfig::openai(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Claude => "claude",
            Self::Openai => "openai",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" | "gpt" => Ok(Self::Openai),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Per-provider connection overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// API host override.
    pub base_url: Option<String>,
    /// Environment variable to read the key from instead of the provider's default.
    pub api_key_env: Option<String>,
}

impl EndpointConfig {
    /// The key named by `api_key_env`; blank when that variable is unset.
    #[must_use]
    pub fn explicit_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .map(|name| std::env::var(name).unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    provider: Option<ProviderKind>,
    extraction: Option<toml::Table>,
    claude: EndpointConfig,
    openai: EndpointConfig,
}

/// Everything needed to build a [`DocumentExtractor`](commission_core::DocumentExtractor).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Selected provider.
    pub provider: ProviderKind,
    /// Extraction behavior.
    pub extraction: ExtractionConfig,
    /// Claude endpoint overrides.
    pub claude: EndpointConfig,
    /// `OpenAI` endpoint overrides.
    pub openai: EndpointConfig,
}

impl Settings {
    /// Provider defaults with no file.
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            extraction: provider.default_extraction(),
            claude: EndpointConfig::default(),
            openai: EndpointConfig::default(),
        }
    }

    /// Loads `path` if given; `provider` overrides the file's choice.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigRead` if the file cannot be read, `Error::ConfigParse`
    /// for malformed TOML, and `Error::Extraction` if the merged config is invalid.
    pub fn load(path: Option<&Path>, provider: Option<ProviderKind>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self::new(provider.unwrap_or_default()));
        };
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(event = "config_loaded", path = %path.display(), "config_loaded");
        Self::from_toml_str(&text, provider)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn from_toml_str(text: &str, provider: Option<ProviderKind>) -> Result<Self, Error> {
        let file: FileConfig = toml::from_str(text)?;
        let provider = provider.or(file.provider).unwrap_or_default();

        let mut extraction = provider.default_extraction();
        if let Some(overlay) = file.extraction {
            let mut merged =
                toml::Value::try_from(&extraction).map_err(|e| Error::Config(e.to_string()))?;
            merge_values(&mut merged, toml::Value::Table(overlay));
            extraction = merged.try_into()?;
        }
        extraction.validate()?;

        Ok(Self {
            provider,
            extraction,
            claude: file.claude,
            openai: file.openai,
        })
    }
}

/// Recursively overlays tables; any other value replaces the base.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commission_core::rate_limit::ProviderLimits;
    use std::io::Write;

    #[test]
    fn test_overlay_keeps_provider_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            provider = "openai"

            [extraction]
            min_coverage = 0.75

            [extraction.chunking]
            max_chunk_size = 6
            "#,
            None,
        )
        .unwrap();

        assert_eq!(settings.provider, ProviderKind::Openai);
        assert_eq!(settings.extraction.chunking.max_chunk_size, 6);
        assert_eq!(settings.extraction.chunking.overlap_pages, 1);
        assert_eq!(settings.extraction.limits, ProviderLimits::openai());
        assert_eq!(settings.extraction.request_timeout_secs, 600);
        assert!((settings.extraction.min_coverage - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_argument_overrides_file_provider() {
        let settings = Settings::from_toml_str("provider = \"openai\"", Some(ProviderKind::Claude)).unwrap();
        assert_eq!(settings.provider, ProviderKind::Claude);
        assert_eq!(settings.extraction, ExtractionConfig::claude());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Settings::from_toml_str("[extraction]\nmin_coverage = 2.0", None).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));

        let err = Settings::from_toml_str("provider = \"claude\"\ntypo = 1", None).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_endpoint_overrides() {
        let settings = Settings::from_toml_str(
            "[claude]\nbase_url = \"http://localhost:9000\"\napi_key_env = \"COMMISSION_EXTRACT_TEST_NEVER_SET\"",
            None,
        )
        .unwrap();
        assert_eq!(settings.claude.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(settings.claude.explicit_key().as_deref(), Some(""));
        assert_eq!(settings.openai, EndpointConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[extraction]\ndeadline_secs = 120").unwrap();
        let settings = Settings::load(Some(file.path()), None).unwrap();
        assert_eq!(settings.extraction.deadline_secs, Some(120));

        let missing = Settings::load(Some(Path::new("/nonexistent/commission.toml")), None);
        assert!(matches!(missing, Err(Error::ConfigRead { .. })));
        assert_eq!(Settings::load(None, None).unwrap(), Settings::new(ProviderKind::Claude));
    }

    #[test]
    fn test_provider_names() {
        assert_eq!("Anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!("openai".parse::<ProviderKind>().unwrap().to_string(), "openai");
        assert!(matches!("gemini".parse::<ProviderKind>(), Err(Error::UnknownProvider(_))));
    }
}
