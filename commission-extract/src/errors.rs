//! Public error types for commission-extract.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from building an extractor or running an extraction.
///
/// Missing credentials get their own variants with the environment variable
/// to set; adapter and core errors are wrapped with their chain preserved.
#[derive(Debug, Error)]
pub enum Error {
    /// No Anthropic API key available.
    #[error("Anthropic API key not found. Set ANTHROPIC_API_KEY")]
    ClaudeKeyMissing,

    /// No `OpenAI` API key available.
    #[error("OpenAI API key not found. Set OPENAI_API_KEY")]
    OpenAiKeyMissing,

    /// The provider was compiled out or is unknown.
    #[error("Unknown provider '{0}'. Valid options: claude, openai")]
    UnknownProvider(String),

    /// Error from the Claude adapter.
    #[cfg(feature = "claude")]
    #[error("{0}")]
    Claude(#[from] claude_adapter::ClaudeError),

    /// Error from the `OpenAI` adapter.
    #[cfg(feature = "openai")]
    #[error("{0}")]
    OpenAi(#[from] openai_adapter::OpenAiError),

    /// Document-level extraction failure.
    #[error("{0}")]
    Extraction(#[from] commission_core::extraction::ExtractionError),

    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has the wrong shape.
    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error (invalid settings or options).
    #[error("Configuration error: {0}")]
    Config(String),
}
