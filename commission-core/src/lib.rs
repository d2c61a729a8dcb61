//! Adaptive chunking and rate-limited extraction of commission statement PDFs.
//!
//! Statement PDFs are too large and too dense to send to a vision model in
//! one request. This crate estimates token cost before every call, plans page
//! chunks that fit the provider's per-minute budgets, re-splits chunks the
//! provider rejects as too large, falls back to single pages, and merges the
//! overlapping results into one deduplicated document.
//!
//! Provider HTTP clients live in separate adapter crates and plug in through
//! [`provider::LlmProvider`].

pub mod breaker;
pub mod estimator;
pub mod extraction;
pub mod extractor;
pub mod merge;
pub mod parser;
pub mod planner;
pub mod prompts;
pub mod provider;
pub mod rate_limit;
pub mod source;
pub mod types;

pub use extractor::{estimate_document, DocumentExtractor, ExtractOptions};

/// Common types for driving an extraction.
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitOpen, CircuitState};
    pub use crate::estimator::{EstimationMode, RiskLevel, TokenEstimate, TokenEstimator};
    pub use crate::extraction::{
        ExtractionConfig, ExtractionError, ExtractionMetrics, ExtractionOutcome, ExtractionReport,
        FailureReason, ProgressEvent, ProgressStage, RetryPolicy, TokenUsage,
    };
    pub use crate::extractor::{estimate_document, DocumentExtractor, ExtractOptions};
    pub use crate::merge::{MergedResult, ResultMerger};
    pub use crate::parser::{ChunkPayload, JsonResponseParser, ParseFailure, ResponseParser};
    pub use crate::planner::{ChunkPlan, ChunkPlanner, ChunkingConfig, ExtractionPlan};
    pub use crate::prompts::{Carrier, PromptRegistry, PromptTemplate};
    pub use crate::provider::{LlmProvider, LlmRequest, LlmResponse, ModelChain, ProviderError};
    pub use crate::rate_limit::{ProviderLimits, RateBucketState, RateLimiter};
    pub use crate::source::{ChunkFile, PageSource, PdfPageSource, SourceError};
    pub use crate::types::{DocumentMetadata, Entity, MetadataField, PageRange, Table};
}
