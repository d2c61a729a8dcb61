//! Per-chunk outcomes and the document-level report.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::metrics::{ExtractionMetrics, TokenUsage};
use crate::merge::MergedResult;
use crate::planner::ExtractionPlan;
use crate::types::{DocumentMetadata, Entity, PageRange, Table};

/// Why a chunk failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The request was too large; a smaller chunk may succeed.
    #[error("token limit exceeded: {0}")]
    TokenLimitExceeded(String),
    /// Rate-limit retries ran out.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    /// Timeout, connection or 5xx retries ran out.
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    /// The model's output could not be parsed.
    #[error("unparseable response: {0}")]
    ParseFailure(String),
    /// The circuit breaker rejected the call.
    #[error("circuit open, retry in {0:?}")]
    CircuitOpen(Duration),
    /// Any other provider rejection.
    #[error("provider error: {0}")]
    Provider(String),
    /// The pages could not be materialized.
    #[error("page source error: {0}")]
    Source(String),
}

impl FailureReason {
    /// Whether a different strategy (smaller chunk, single-page fallback) might succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::TokenLimitExceeded(_) | Self::ParseFailure(_))
    }

    /// Whether splitting the chunk is the remedy, as opposed to page-by-page fallback.
    #[must_use]
    pub const fn wants_resplit(&self) -> bool {
        matches!(self, Self::TokenLimitExceeded(_))
    }
}

/// Content extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkSuccess {
    /// Tables found in the chunk's pages.
    pub tables: Vec<Table>,
    /// Metadata found in the chunk's pages.
    pub document_metadata: DocumentMetadata,
    /// Groups and companies found in the chunk's pages.
    pub entities: Vec<Entity>,
    /// Tokens spent on the chunk.
    pub token_usage: TokenUsage,
    /// Model that produced the result.
    pub model: String,
}

/// Result of one extraction unit: exactly one of success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The chunk produced a parsed payload.
    Success(ChunkSuccess),
    /// The chunk failed.
    Failure {
        /// Classified cause.
        reason: FailureReason,
        /// Whether re-chunking or fallback may help.
        recoverable: bool,
    },
}

impl ExtractionOutcome {
    /// Builds a failure, deriving `recoverable` from the reason.
    #[must_use]
    pub const fn failure(reason: FailureReason) -> Self {
        let recoverable = reason.is_recoverable();
        Self::Failure {
            reason,
            recoverable,
        }
    }
}

/// How a chunk resolved, for provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Extracted successfully.
    Succeeded {
        /// Tables returned.
        tables: usize,
        /// Rows across those tables.
        rows: usize,
    },
    /// Terminally failed.
    Failed {
        /// Cause of the last failure.
        reason: FailureReason,
    },
}

/// Where one piece of the merged result came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    /// Order in which the chunk resolved.
    pub index: usize,
    /// Pages the chunk owns.
    pub page_range: PageRange,
    /// Split depth: 0 for planned chunks.
    pub depth: usize,
    /// Whether the chunk ran through page-by-page fallback.
    pub fallback: bool,
    /// Model that served the chunk, if any did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Resolution.
    pub outcome: ChunkStatus,
}

/// A page range that produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    /// Pages lost.
    pub page_range: PageRange,
    /// Cause of the final failure.
    pub reason: FailureReason,
}

/// The result of extracting one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    /// At least one chunk produced tables and coverage met the configured minimum.
    pub success: bool,
    /// `success` with at least one terminally failed chunk.
    pub partial_success: bool,
    /// Pages in the document.
    pub total_pages: usize,
    /// Covered fraction of pages.
    pub coverage: f64,
    /// Merged tables, metadata, entities and provenance.
    #[serde(flatten)]
    pub result: MergedResult,
    /// Page ranges with no usable extraction.
    pub failed_page_ranges: Vec<PageRange>,
    /// Failures with their causes.
    pub failed_chunks: Vec<FailedChunk>,
    /// Zero-based pages no successful chunk covered.
    pub missing_pages: Vec<usize>,
    /// Set when `missing_pages` is not empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    /// The plan that was executed.
    pub plan: ExtractionPlan,
    /// Counters and token usage.
    pub metrics: ExtractionMetrics,
}

impl ExtractionReport {
    /// Token totals for the extraction.
    #[must_use]
    pub const fn token_usage_summary(&self) -> &TokenUsage {
        &self.metrics.token_usage
    }
}
