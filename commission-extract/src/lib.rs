//! # commission-extract
//!
//! Pull tables, statement metadata and group/company entities out of
//! insurance commission statement PDFs using Claude or `OpenAI` vision models.
//!
//! The heavy lifting (token estimation, rate limiting, chunk planning,
//! recursive re-splitting and result merging) lives in `commission-core`.
//! This crate wires a provider adapter to it and loads settings.
//!
//! ## Example
//!
//! ```no_run
//! # use commission_extract::prelude::*;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None, Some(ProviderKind::Claude))?;
//! let extractor = commission_extract::build_extractor(&settings)?;
//!
//! let options = ExtractOptions::default().with_carrier("Aetna");
//! let report = extractor.extract("statement.pdf", &options).await?;
//! println!("{} tables, coverage {:.0}%", report.result.tables.len(), report.coverage * 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `claude` (default): Anthropic Messages API provider
//! - `openai` (default): `OpenAI` Responses API provider

#![deny(missing_docs)]

/// Claude provider construction.
#[cfg(feature = "claude")]
pub mod claude;

/// `OpenAI` provider construction.
#[cfg(feature = "openai")]
pub mod openai;

/// Settings file loading.
pub mod config;

/// Public error types.
pub mod errors;

/// Commonly used types.
pub mod prelude;

use commission_core::DocumentExtractor;

use crate::config::{ProviderKind, Settings};
use crate::errors::Error;

/// Builds an extractor for the provider `settings` selects.
///
/// # Errors
///
/// Returns `Error::ClaudeKeyMissing` / `Error::OpenAiKeyMissing` when the
/// provider's key is not configured, and `Error::UnknownProvider` when the
/// provider was compiled out.
pub fn build_extractor(settings: &Settings) -> Result<DocumentExtractor, Error> {
    tracing::debug!(
        event = "extractor_building",
        provider = %settings.provider,
        "extractor_building"
    );
    match settings.provider {
        #[cfg(feature = "claude")]
        ProviderKind::Claude => claude::extractor(&settings.claude, settings.extraction.clone()),
        #[cfg(feature = "openai")]
        ProviderKind::Openai => openai::extractor(&settings.openai, settings.extraction.clone()),
        #[allow(unreachable_patterns)]
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}
