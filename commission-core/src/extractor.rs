//! The public entry point: one provider, one shared rate limiter and breaker,
//! any number of documents.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::estimator::{EstimationMode, TokenEstimate, TokenEstimator};
use crate::extraction::{
    plan_document, ChunkCall, DocumentJob, ExtractionCaller, ExtractionConfig, ExtractionError,
    ExtractionOutcome, ExtractionReport, ProgressEvent, ProgressReporter, RecursiveChunkController,
};
use crate::merge::{MergeInput, ResultMerger};
use crate::parser::{JsonResponseParser, ResponseParser};
use crate::planner::{ChunkPlanner, ExtractionPlan};
use crate::prompts::PromptRegistry;
use crate::provider::LlmProvider;
use crate::rate_limit::RateLimiter;
use crate::source::{PageSource, PdfPageSource};
use crate::types::{DocumentMetadata, PageRange};

/// Per-document options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Only the first `max_pages` pages are processed.
    pub max_pages: Option<usize>,
    /// Try the configured mini model first.
    pub prefer_mini_model: bool,
    /// Chunk size override; forces chunking even when the document fits.
    pub forced_chunk_size: Option<usize>,
    /// Carrier name for prompt selection.
    pub carrier: Option<String>,
    /// Wall-clock budget overriding the configured deadline.
    pub deadline: Option<Duration>,
}

impl ExtractOptions {
    /// Limit processing to the first `max_pages` pages.
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Prefer the mini model.
    #[must_use]
    pub const fn with_prefer_mini_model(mut self, prefer: bool) -> Self {
        self.prefer_mini_model = prefer;
        self
    }

    /// Force a chunk size.
    #[must_use]
    pub const fn with_forced_chunk_size(mut self, size: usize) -> Self {
        self.forced_chunk_size = Some(size);
        self
    }

    /// Select carrier prompts.
    #[must_use]
    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }

    /// Set a wall-clock budget.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Estimate and chunk plan for `total_pages` under `config`, with no provider involved.
pub fn estimate_document(
    config: &ExtractionConfig,
    total_pages: usize,
    forced_chunk_size: Option<usize>,
) -> Result<(TokenEstimate, ExtractionPlan), ExtractionError> {
    let estimator = TokenEstimator::new(config.estimator.clone(), &config.limits);
    let planner = ChunkPlanner::new(config.chunking.clone());
    Ok(plan_document(&estimator, &planner, total_pages, forced_chunk_size)?)
}

/// Extracts commission statements through one LLM provider.
pub struct DocumentExtractor {
    config: ExtractionConfig,
    provider: Arc<dyn LlmProvider>,
    parser: Arc<dyn ResponseParser>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    prompts: PromptRegistry,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl std::fmt::Debug for DocumentExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentExtractor")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DocumentExtractor {
    /// Creates an extractor with its own limiter and breaker sized from `config`.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: ExtractionConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.limits.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        Self {
            config,
            provider,
            parser: Arc::new(JsonResponseParser),
            limiter,
            breaker,
            prompts: PromptRegistry::default(),
            progress: None,
        }
    }

    /// Replaces the response parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Shares a limiter with other extractors using the same API key.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replaces the prompt registry.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = prompts;
        self
    }

    /// Sends progress events for every extraction to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The shared rate limiter.
    #[must_use]
    pub const fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The shared circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn estimator(&self) -> TokenEstimator {
        TokenEstimator::new(self.config.estimator.clone(), &self.config.limits)
    }

    fn caller(&self) -> ExtractionCaller {
        ExtractionCaller::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.parser),
            Arc::clone(&self.limiter),
            Arc::clone(&self.breaker),
            self.estimator(),
        )
        .with_retry(self.config.retry.clone())
        .with_request_timeout(self.config.request_timeout())
    }

    fn controller(&self) -> RecursiveChunkController {
        RecursiveChunkController::new(
            self.caller(),
            self.estimator(),
            ChunkPlanner::new(self.config.chunking.clone()),
        )
        .with_min_coverage(self.config.min_coverage)
    }

    /// Dry run: the estimate and plan for a document, without network I/O.
    pub fn estimate(
        &self,
        total_pages: usize,
        forced_chunk_size: Option<usize>,
    ) -> Result<(TokenEstimate, ExtractionPlan), ExtractionError> {
        estimate_document(&self.config, total_pages, forced_chunk_size)
    }

    /// Extracts the PDF at `path`.
    pub async fn extract(
        &self,
        path: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractionReport, ExtractionError> {
        let source = PdfPageSource::open(path).await?;
        self.extract_source(&source, options).await
    }

    /// Extracts any paged document.
    #[tracing::instrument(
        skip(self, source, options),
        fields(extraction.id = %Uuid::new_v4(), provider = self.provider.name())
    )]
    pub async fn extract_source(
        &self,
        source: &dyn PageSource,
        options: &ExtractOptions,
    ) -> Result<ExtractionReport, ExtractionError> {
        let total_pages = options
            .max_pages
            .map_or(source.page_count(), |max| max.min(source.page_count()));
        let models = self.config.model_chain(options.prefer_mini_model);
        let prompts = self.prompts.lookup(options.carrier.as_deref());
        let progress = ProgressReporter::new(self.progress.clone());

        tracing::info!(
            event = "extraction_started",
            total_pages,
            carrier = options.carrier.as_deref().unwrap_or("generic"),
            "extraction_started"
        );
        let job = DocumentJob {
            source,
            total_pages,
            prompts,
            models: &models,
            forced_chunk_size: options.forced_chunk_size,
            deadline: options.deadline.or_else(|| self.config.deadline()),
        };
        self.controller().extract_document(job, &progress).await
    }

    /// Scans the first page for statement metadata (carrier, broker, date, total).
    pub async fn extract_metadata(
        &self,
        source: &dyn PageSource,
        options: &ExtractOptions,
    ) -> Result<DocumentMetadata, ExtractionError> {
        if source.page_count() == 0 || options.max_pages == Some(0) {
            return Err(ExtractionError::EmptyDocument);
        }
        let models = self.config.model_chain(options.prefer_mini_model);
        let prompts = self.prompts.lookup(options.carrier.as_deref());
        let range = PageRange::single(0);
        let call = ChunkCall {
            range,
            prompt: &prompts.metadata,
            mode: EstimationMode::Metadata,
            models: &models,
        };
        let (outcome, _) = self.caller().call(source, call).await;
        match outcome {
            ExtractionOutcome::Success(success) => {
                let merged = ResultMerger.merge(&[MergeInput {
                    index: 0,
                    page_range: range,
                    success,
                }]);
                Ok(merged.document_metadata)
            }
            ExtractionOutcome::Failure { reason, .. } => Err(ExtractionError::MetadataScan(reason)),
        }
    }
}
