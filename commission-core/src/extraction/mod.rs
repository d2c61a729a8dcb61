//! Rate-limited, re-chunking extraction of whole documents.
//!
//! - [`ExtractionCaller`] - one bounded remote call with retry and model fallback
//! - [`RecursiveChunkController`] - plans, re-splits, falls back page by page, merges
//! - [`ExtractionOutcome`] - per-chunk success or typed failure
//! - [`ExtractionReport`] - the document result with coverage and provenance
//! - [`ExtractionConfig`] - every tunable in one serde-loadable value
//! - [`ExtractionMetrics`] - per-extraction counters
//! - [`ProgressReporter`] - ordered progress events

pub mod caller;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod outcome;
pub mod progress;

pub use caller::{ChunkCall, ExtractionCaller};
pub use config::{ExtractionConfig, RetryPolicy};
pub use controller::{plan_document, DocumentJob, RecursiveChunkController};
pub use error::ExtractionError;
pub use metrics::{CallMetrics, ExtractionMetrics, TokenUsage};
pub use outcome::{
    ChunkProvenance, ChunkStatus, ChunkSuccess, ExtractionOutcome, ExtractionReport, FailedChunk,
    FailureReason,
};
pub use progress::{ProgressEvent, ProgressReporter, ProgressStage};
