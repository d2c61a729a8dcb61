//! Common imports for commission-extract usage.
//!
//! ```
//! use commission_extract::prelude::*;
//! ```

// Client types (feature-gated)
#[cfg(feature = "claude")]
pub use claude_adapter::ClaudeClient;
#[cfg(feature = "openai")]
pub use openai_adapter::OpenAiClient;

pub use crate::build_extractor;
pub use crate::config::{EndpointConfig, ProviderKind, Settings};
pub use crate::errors::Error;

// Core types so users don't need a separate commission-core import
pub use commission_core::extraction::{
    ExtractionConfig, ExtractionMetrics, ExtractionReport, FailureReason, ProgressEvent,
    ProgressStage,
};
pub use commission_core::planner::ExtractionPlan;
pub use commission_core::source::{PageSource, PdfPageSource};
pub use commission_core::types::{DocumentMetadata, Entity, PageRange, Table};
pub use commission_core::{estimate_document, DocumentExtractor, ExtractOptions};
