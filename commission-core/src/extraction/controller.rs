//! Drives a whole document through the caller, chunk by chunk.
//!
//! Each chunk moves through `Planned → Attempting → {Succeeded | NeedsResplit |
//! NeedsFallback | FailedTerminal}`. Re-split halves go to the front of the
//! work queue, so chunks still resolve in page order.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::caller::{ChunkCall, ExtractionCaller};
use super::error::ExtractionError;
use super::metrics::ExtractionMetrics;
use super::outcome::{
    ChunkProvenance, ChunkStatus, ChunkSuccess, ExtractionOutcome, ExtractionReport, FailedChunk, FailureReason,
};
use super::progress::{chunk_percent, ProgressReporter, ProgressStage};
use crate::estimator::{EstimationMode, TokenEstimate, TokenEstimator};
use crate::merge::{MergeInput, ResultMerger};
use crate::planner::{ChunkPlanner, ExtractionPlan, PlanError};
use crate::prompts::PromptTemplate;
use crate::provider::ModelChain;
use crate::source::PageSource;
use crate::types::PageRange;

/// Everything the controller needs to know about one document.
#[derive(Clone, Copy)]
pub struct DocumentJob<'a> {
    /// Where pages come from.
    pub source: &'a dyn PageSource,
    /// Pages to process, starting at page 0.
    pub total_pages: usize,
    /// Prompts for this document's carrier.
    pub prompts: &'a PromptTemplate,
    /// Models to try.
    pub models: &'a ModelChain,
    /// Override for the planned chunk size; forces chunking.
    pub forced_chunk_size: Option<usize>,
    /// Wall-clock budget, checked between chunks.
    pub deadline: Option<Duration>,
}

/// A chunk waiting to be attempted.
#[derive(Debug, Clone, Copy)]
struct WorkItem {
    range: PageRange,
    effective_start: usize,
    depth: usize,
    /// Index of the planned chunk this item descends from.
    root: usize,
}

impl WorkItem {
    const fn request_range(&self) -> PageRange {
        PageRange::new(self.effective_start, self.range.end)
    }
}

/// Mutable bookkeeping for one run.
struct Run<'a> {
    job: DocumentJob<'a>,
    progress: &'a ProgressReporter,
    started: Instant,
    planned_chunks: usize,
    resolved: usize,
    /// Queued or running items per planned chunk.
    outstanding: Vec<usize>,
    pages_done: usize,
    successes: Vec<MergeInput>,
    provenance: Vec<ChunkProvenance>,
    failures: Vec<FailedChunk>,
    covered: BTreeSet<usize>,
    metrics: ExtractionMetrics,
}

impl Run<'_> {
    /// Retires one item of `root` that queued `spawned` sub-items.
    fn settle(&mut self, root: usize, spawned: usize) {
        let left = &mut self.outstanding[root];
        *left = left.saturating_sub(1).saturating_add(spawned);
        if *left == 0 {
            self.resolved += 1;
        }
    }

    fn check_deadline(&self) -> Result<(), ExtractionError> {
        let Some(budget) = self.job.deadline else {
            return Ok(());
        };
        if self.started.elapsed() < budget {
            return Ok(());
        }
        tracing::warn!(
            event = "extraction_deadline_exceeded",
            budget_ms = budget.as_millis() as u64,
            resolved = self.resolved,
            "extraction_deadline_exceeded"
        );
        self.progress.emit(
            ProgressStage::Failed,
            chunk_percent(self.pages_done, self.job.total_pages),
            format!("Deadline of {budget:?} exceeded"),
        );
        Err(ExtractionError::DeadlineExceeded {
            budget,
            completed: self.resolved,
            total: self.planned_chunks,
        })
    }

    fn record_success(&mut self, range: PageRange, depth: usize, fallback: bool, success: ChunkSuccess) {
        let index = self.provenance.len();
        let rows = success.tables.iter().map(|t| t.row_count()).sum();
        self.provenance.push(ChunkProvenance {
            index,
            page_range: range,
            depth,
            fallback,
            model: Some(success.model.clone()),
            outcome: ChunkStatus::Succeeded {
                tables: success.tables.len(),
                rows,
            },
        });
        self.covered.extend(range.pages());
        self.successes.push(MergeInput {
            index,
            page_range: range,
            success,
        });
        self.page_resolved(range, ProgressStage::ChunkCompleted, format!("Extracted {range}"));
    }

    fn record_failure(&mut self, range: PageRange, depth: usize, fallback: bool, reason: FailureReason) {
        tracing::warn!(
            event = "chunk_failed_terminal",
            range = %range,
            depth,
            reason = %reason,
            "chunk_failed_terminal"
        );
        let index = self.provenance.len();
        self.provenance.push(ChunkProvenance {
            index,
            page_range: range,
            depth,
            fallback,
            model: None,
            outcome: ChunkStatus::Failed {
                reason: reason.clone(),
            },
        });
        self.failures.push(FailedChunk {
            page_range: range,
            reason,
        });
        self.metrics.terminal_failures += 1;
        self.page_resolved(range, ProgressStage::ChunkFailed, format!("Failed to extract {range}"));
    }

    fn page_resolved(&mut self, range: PageRange, stage: ProgressStage, message: String) {
        self.pages_done += range.len();
        self.progress
            .emit(stage, chunk_percent(self.pages_done, self.job.total_pages), message);
    }
}

/// Orchestrates planning, recursive re-chunking, page fallback and merging.
#[derive(Debug)]
pub struct RecursiveChunkController {
    caller: ExtractionCaller,
    estimator: TokenEstimator,
    planner: ChunkPlanner,
    merger: ResultMerger,
    min_coverage: f64,
}

impl RecursiveChunkController {
    /// Creates a controller.
    #[must_use]
    pub const fn new(caller: ExtractionCaller, estimator: TokenEstimator, planner: ChunkPlanner) -> Self {
        Self {
            caller,
            estimator,
            planner,
            merger: ResultMerger,
            min_coverage: 0.0,
        }
    }

    /// Fraction of pages that must be covered for `success`.
    #[must_use]
    pub const fn with_min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    /// Estimates a document and plans it, honoring a forced chunk size.
    pub fn plan(
        &self,
        total_pages: usize,
        forced_chunk_size: Option<usize>,
    ) -> Result<(TokenEstimate, ExtractionPlan), PlanError> {
        plan_document(&self.estimator, &self.planner, total_pages, forced_chunk_size)
    }

    /// Extracts every page of `job`, containing per-chunk failures.
    ///
    /// Only an empty document or an exceeded deadline is an error; a document
    /// where every chunk failed comes back with `success == false`.
    pub async fn extract_document(
        &self,
        job: DocumentJob<'_>,
        progress: &ProgressReporter,
    ) -> Result<ExtractionReport, ExtractionError> {
        if job.total_pages == 0 {
            return Err(ExtractionError::EmptyDocument);
        }
        progress.emit(
            ProgressStage::Planning,
            0,
            format!("Planning extraction of {} pages", job.total_pages),
        );
        let (estimate, plan) = self.plan(job.total_pages, job.forced_chunk_size)?;
        let chunks = plan.chunks();
        tracing::info!(
            event = "extraction_planned",
            total_pages = job.total_pages,
            chunks = chunks.len(),
            estimated_input_tokens = estimate.estimated_input_tokens,
            safe_limit = estimate.safe_limit,
            risk_level = ?estimate.risk_level,
            "extraction_planned"
        );
        progress.emit(
            ProgressStage::Planning,
            chunk_percent(0, job.total_pages),
            format!("Processing {} chunk(s)", chunks.len()),
        );

        let mut run = Run {
            job,
            progress,
            started: Instant::now(),
            planned_chunks: chunks.len(),
            resolved: 0,
            outstanding: vec![1; chunks.len()],
            pages_done: 0,
            successes: Vec::new(),
            provenance: Vec::new(),
            failures: Vec::new(),
            covered: BTreeSet::new(),
            metrics: ExtractionMetrics::default(),
        };

        let mut queue: VecDeque<WorkItem> = chunks
            .iter()
            .enumerate()
            .map(|(root, c)| WorkItem {
                range: c.base_range(),
                effective_start: c.effective_start_page,
                depth: 0,
                root,
            })
            .collect();

        while let Some(item) = queue.pop_front() {
            run.check_deadline()?;
            let spawned = self.run_item(&mut run, item, &mut queue).await?;
            run.settle(item.root, spawned);
        }

        Ok(self.finish(run, plan))
    }

    /// Attempts one item; returns how many sub-items it queued.
    async fn run_item(
        &self,
        run: &mut Run<'_>,
        item: WorkItem,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<usize, ExtractionError> {
        let job = run.job;
        run.progress.emit(
            ProgressStage::ChunkStarted,
            chunk_percent(run.pages_done, job.total_pages),
            format!("Extracting {}", item.range),
        );
        let call = ChunkCall {
            range: item.request_range(),
            prompt: &job.prompts.standard,
            mode: EstimationMode::Standard,
            models: job.models,
        };
        let (outcome, call_metrics) = self.caller.call(job.source, call).await;
        run.metrics.absorb(&call_metrics);

        let reason = match outcome {
            ExtractionOutcome::Success(success) => {
                run.record_success(item.range, item.depth, false, success);
                return Ok(0);
            }
            ExtractionOutcome::Failure { reason, .. } => reason,
        };

        let max_depth = self.planner.config().max_recursion_depth;
        if reason.wants_resplit() && item.range.len() > 1 && item.depth < max_depth {
            let half = item.range.len().div_ceil(2);
            let parts = self.planner.partition(item.range, half, item.effective_start);
            tracing::info!(
                event = "chunk_resplit",
                range = %item.range,
                depth = item.depth,
                parts = parts.len(),
                "chunk_resplit"
            );
            run.metrics.resplits += 1;
            for part in parts.iter().rev() {
                queue.push_front(WorkItem {
                    range: part.base_range(),
                    effective_start: part.effective_start_page,
                    depth: item.depth + 1,
                    root: item.root,
                });
            }
            return Ok(parts.len());
        }

        if reason.is_recoverable() {
            self.fallback_pages(run, item).await?;
            return Ok(0);
        }

        run.record_failure(item.range, item.depth, false, reason);
        Ok(0)
    }

    /// Re-issues `item` one page at a time with the compressed prompt.
    async fn fallback_pages(&self, run: &mut Run<'_>, item: WorkItem) -> Result<(), ExtractionError> {
        tracing::warn!(
            event = "page_fallback",
            range = %item.range,
            depth = item.depth,
            "page_fallback"
        );
        let job = run.job;
        for page in item.range.pages() {
            run.check_deadline()?;
            let range = PageRange::single(page);
            let call = ChunkCall {
                range,
                prompt: &job.prompts.compressed,
                mode: EstimationMode::Standard,
                models: job.models,
            };
            let (outcome, call_metrics) = self.caller.call(job.source, call).await;
            run.metrics.absorb(&call_metrics);
            run.metrics.fallback_pages += 1;
            match outcome {
                ExtractionOutcome::Success(success) => run.record_success(range, item.depth, true, success),
                ExtractionOutcome::Failure { reason, .. } => {
                    run.record_failure(range, item.depth, true, reason);
                }
            }
        }
        Ok(())
    }

    fn finish(&self, run: Run<'_>, plan: ExtractionPlan) -> ExtractionReport {
        let total_pages = run.job.total_pages;
        run.progress.emit(
            ProgressStage::Merging,
            chunk_percent(total_pages, total_pages),
            format!("Merging {} chunk result(s)", run.successes.len()),
        );
        let mut result = self.merger.merge(&run.successes);
        result.chunk_provenance = run.provenance;

        let missing_pages: Vec<usize> = (0..total_pages).filter(|p| !run.covered.contains(p)).collect();
        let validation_error = (!missing_pages.is_empty()).then(|| {
            let listed: Vec<String> = missing_pages.iter().map(|p| (p + 1).to_string()).collect();
            format!("pages not covered by any successful extraction: {}", listed.join(", "))
        });
        let coverage = run.covered.len() as f64 / total_pages as f64;

        let any_tables = run.successes.iter().any(|s| !s.success.tables.is_empty());
        let success = any_tables && coverage >= self.min_coverage;
        let partial_success = success && !run.failures.is_empty();
        let failed_page_ranges = coalesce(run.failures.iter().map(|f| f.page_range));

        let mut metrics = run.metrics;
        metrics.wall_time = run.started.elapsed();

        let (stage, message) = if success {
            (ProgressStage::Completed, format!("Extracted {} table(s)", result.tables.len()))
        } else {
            (ProgressStage::Failed, "No chunk produced usable tables".to_string())
        };
        tracing::info!(
            event = "extraction_finished",
            success,
            partial_success,
            coverage,
            tables = result.tables.len(),
            failed_ranges = failed_page_ranges.len(),
            remote_calls = metrics.remote_calls,
            "extraction_finished"
        );
        run.progress.emit(stage, 100, message);

        ExtractionReport {
            success,
            partial_success,
            total_pages,
            coverage,
            result,
            failed_page_ranges,
            failed_chunks: run.failures,
            missing_pages,
            validation_error,
            plan,
            metrics,
        }
    }
}

/// Standard-mode estimate plus plan; a forced chunk size always chunks.
pub fn plan_document(
    estimator: &TokenEstimator,
    planner: &ChunkPlanner,
    total_pages: usize,
    forced_chunk_size: Option<usize>,
) -> Result<(TokenEstimate, ExtractionPlan), PlanError> {
    let estimate = estimator.estimate(total_pages, EstimationMode::Standard);
    let plan = match forced_chunk_size {
        Some(size) => {
            let forced = TokenEstimate {
                recommended_chunk_size: size.max(1),
                page_capacity: size.max(1),
                ..estimate
            };
            planner.plan(total_pages, &forced, true)?
        }
        None => planner.plan(total_pages, &estimate, false)?,
    };
    Ok((estimate, plan))
}

/// Merges adjacent or overlapping ranges.
fn coalesce(ranges: impl Iterator<Item = PageRange>) -> Vec<PageRange> {
    let mut sorted: Vec<PageRange> = ranges.collect();
    sorted.sort();
    let mut out: Vec<PageRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match out.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => out.push(range),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_adjacent_failures() {
        let ranges = [
            PageRange::single(7),
            PageRange::single(4),
            PageRange::single(5),
            PageRange::new(9, 12),
        ];
        assert_eq!(
            coalesce(ranges.into_iter()),
            vec![PageRange::new(4, 6), PageRange::single(7), PageRange::new(9, 12)]
        );
    }
}
