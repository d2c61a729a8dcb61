//! Document-wide extraction errors.
//!
//! Per-chunk failures are not errors; they are recorded as
//! [`ExtractionOutcome::Failure`](super::ExtractionOutcome) values and the
//! rest of the document keeps going.

use std::time::Duration;
use thiserror::Error;

use super::outcome::FailureReason;
use crate::planner::PlanError;
use crate::source::SourceError;

/// Errors that end an extraction as a whole.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document (after `max_pages`) has no pages.
    #[error("document has no pages")]
    EmptyDocument,

    /// The document could not be opened.
    #[error("document could not be read: {0}")]
    Source(#[from] SourceError),

    /// The caller's wall-clock budget ran out between chunks.
    #[error("extraction deadline of {budget:?} exceeded after {completed} of {total} chunks")]
    DeadlineExceeded {
        /// Configured budget.
        budget: Duration,
        /// Chunks resolved before the deadline check failed.
        completed: usize,
        /// Chunks in the plan.
        total: usize,
    },

    /// The first-page metadata scan failed.
    #[error("metadata scan failed: {0}")]
    MetadataScan(FailureReason),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<PlanError> for ExtractionError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::EmptyDocument => Self::EmptyDocument,
        }
    }
}
