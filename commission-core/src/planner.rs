//! Chunk planning: single call versus page-range partitioning.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::estimator::{RiskLevel, TokenEstimate};
use crate::types::PageRange;

/// Chunking behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on pages per call, whatever the budget allows.
    pub max_chunk_size: usize,
    /// Pages each chunk re-reads from the end of the previous one.
    pub overlap_pages: usize,
    /// How many times a chunk may be split after a token-limit failure.
    pub max_recursion_depth: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 10,
            overlap_pages: 1,
            max_recursion_depth: 2,
        }
    }
}

/// One planned extraction unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChunk {
    /// Position in the plan.
    pub index: usize,
    /// First page this chunk owns.
    pub start_page: usize,
    /// One past the last page this chunk owns.
    pub end_page: usize,
    /// First page actually sent, including the look-back overlap.
    pub effective_start_page: usize,
    /// Number of owned pages.
    pub page_count: usize,
}

impl PlannedChunk {
    /// Pages this chunk owns.
    #[must_use]
    pub const fn base_range(&self) -> PageRange {
        PageRange::new(self.start_page, self.end_page)
    }

    /// Pages sent to the model, overlap included.
    #[must_use]
    pub const fn request_range(&self) -> PageRange {
        PageRange::new(self.effective_start_page, self.end_page)
    }
}

/// An ordered, gap-free partition of a document into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    /// Chunks in page order.
    pub chunks: Vec<PlannedChunk>,
    /// Pages per chunk (the last chunk may be shorter).
    pub chunk_size: usize,
    /// Overlap actually applied.
    pub overlap: usize,
    /// `Critical` when even one page exceeds the budget.
    pub risk_level: RiskLevel,
}

/// Strategy for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExtractionPlan {
    /// Everything in one request.
    SingleCall {
        /// Pages in the document.
        total_pages: usize,
    },
    /// Page-range chunks processed in order.
    Chunked(ChunkPlan),
}

impl ExtractionPlan {
    /// The chunks to execute; a single call is one chunk spanning the document.
    #[must_use]
    pub fn chunks(&self) -> Vec<PlannedChunk> {
        match self {
            Self::SingleCall { total_pages } => vec![PlannedChunk {
                index: 0,
                start_page: 0,
                end_page: *total_pages,
                effective_start_page: 0,
                page_count: *total_pages,
            }],
            Self::Chunked(plan) => plan.chunks.clone(),
        }
    }
}

/// Planning errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Nothing to plan.
    #[error("document has no pages")]
    EmptyDocument,
}

/// Decides how a document is split into requests.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    config: ChunkingConfig,
}

impl ChunkPlanner {
    /// Creates a planner.
    #[must_use]
    pub const fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// The planner's configuration.
    #[must_use]
    pub const fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Plans a document from its whole-document estimate.
    ///
    /// A document that fits is sent in one call unless `forced` is set.
    pub fn plan(
        &self,
        total_pages: usize,
        estimate: &TokenEstimate,
        forced: bool,
    ) -> Result<ExtractionPlan, PlanError> {
        if total_pages == 0 {
            return Err(PlanError::EmptyDocument);
        }
        if !forced && estimate.will_fit {
            return Ok(ExtractionPlan::SingleCall { total_pages });
        }

        let mut plan = self.plan_with_chunk_size(total_pages, estimate.recommended_chunk_size)?;
        if estimate.page_capacity == 0 {
            tracing::warn!(
                event = "chunk_budget_below_one_page",
                safe_limit = estimate.safe_limit,
                "chunk_budget_below_one_page"
            );
            plan.risk_level = RiskLevel::Critical;
        }
        Ok(ExtractionPlan::Chunked(plan))
    }

    /// Partitions a document into chunks of `chunk_size` pages (clamped to the maximum).
    pub fn plan_with_chunk_size(
        &self,
        total_pages: usize,
        chunk_size: usize,
    ) -> Result<ChunkPlan, PlanError> {
        if total_pages == 0 {
            return Err(PlanError::EmptyDocument);
        }
        let size = self.clamp(chunk_size);
        let chunks = self.partition(PageRange::new(0, total_pages), size, 0);
        Ok(ChunkPlan {
            chunks,
            chunk_size: size,
            overlap: self.overlap_for(size),
            risk_level: RiskLevel::Safe,
        })
    }

    /// Splits `range` into consecutive chunks of `chunk_size` pages.
    ///
    /// The first chunk starts reading at `first_effective_start`; later chunks
    /// look back by the configured overlap. A one-page chunk never overlaps,
    /// since that would double its request size.
    #[must_use]
    pub fn partition(
        &self,
        range: PageRange,
        chunk_size: usize,
        first_effective_start: usize,
    ) -> Vec<PlannedChunk> {
        let size = self.clamp(chunk_size);
        let overlap = self.overlap_for(size);
        let mut chunks = Vec::with_capacity(range.len().div_ceil(size));
        let mut start = range.start;
        while start < range.end {
            let end = start.saturating_add(size).min(range.end);
            let index = chunks.len();
            let effective_start_page = if index == 0 {
                first_effective_start.min(start)
            } else {
                start.saturating_sub(overlap).max(range.start)
            };
            chunks.push(PlannedChunk {
                index,
                start_page: start,
                end_page: end,
                effective_start_page,
                page_count: end - start,
            });
            start = end;
        }
        chunks
    }

    fn clamp(&self, chunk_size: usize) -> usize {
        chunk_size.clamp(1, self.config.max_chunk_size.max(1))
    }

    fn overlap_for(&self, chunk_size: usize) -> usize {
        self.config.overlap_pages.min(chunk_size.saturating_sub(1))
    }
}
