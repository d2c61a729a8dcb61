//! End-to-end controller behavior against a scripted provider and an
//! in-memory page source.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use commission_core::breaker::BreakerConfig;
use commission_core::extraction::{
    ExtractionConfig, ExtractionError, FailureReason, ProgressStage, RetryPolicy,
};
use commission_core::planner::ExtractionPlan;
use commission_core::prompts::PromptRegistry;
use commission_core::provider::{LlmProvider, LlmRequest, LlmResponse, ModelChain, ProviderError};
use commission_core::rate_limit::ProviderLimits;
use commission_core::source::{ChunkFile, PageSource, SourceError};
use commission_core::types::PageRange;
use commission_core::{DocumentExtractor, ExtractOptions};

type Script = dyn Fn(&LlmRequest) -> Result<String, ProviderError> + Send + Sync;

struct ScriptedProvider {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(script: impl Fn(&LlmRequest) -> Result<String, ProviderError> + Send + Sync + 'static) -> Arc<Self> {
        Self::slow(Duration::ZERO, script)
    }

    fn slow(
        delay: Duration,
        script: impl Fn(&LlmRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(request.clone());
        let text = (self.script)(&request)?;
        Ok(LlmResponse {
            text,
            input_tokens: 1_000,
            output_tokens: 100,
            model: request.model,
        })
    }
}

struct MemorySource {
    pages: usize,
}

#[async_trait]
impl PageSource for MemorySource {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn materialize(&self, range: PageRange) -> Result<ChunkFile, SourceError> {
        if range.end > self.pages {
            return Err(SourceError::OutOfRange {
                range,
                page_count: self.pages,
            });
        }
        Ok(ChunkFile::in_memory(range, format!("{}..{}", range.start, range.end).into_bytes()))
    }
}

/// One table with a row per requested page.
fn pages_json(range: PageRange) -> String {
    let rows: Vec<_> = range
        .pages()
        .map(|p| json!([format!("G{p}"), p.to_string()]))
        .collect();
    json!({
        "tables": [{"headers": ["Group", "Page"], "rows": rows}],
        "document_metadata": {"carrier_name": "Aetna", "carrier_confidence": 0.9},
        "groups_and_companies": []
    })
    .to_string()
}

fn fast_config() -> ExtractionConfig {
    ExtractionConfig::claude()
        .with_limits(ProviderLimits {
            requests_per_minute: 10_000,
            input_tokens_per_minute: 1_000_000,
            output_tokens_per_minute: 1_000_000,
            max_output_tokens: 16_000,
            safety_buffer: 0.85,
        })
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_factor: 0.0,
        })
}

fn extractor(provider: &Arc<ScriptedProvider>, config: ExtractionConfig) -> DocumentExtractor {
    DocumentExtractor::new(Arc::clone(provider) as Arc<dyn LlmProvider>, config)
}

fn row_pages(report: &commission_core::extraction::ExtractionReport) -> Vec<String> {
    let mut pages: Vec<String> = report
        .result
        .tables
        .iter()
        .flat_map(|t| t.rows.iter())
        .filter_map(|row| row[1].clone())
        .collect();
    pages.sort_by_key(|p| p.parse::<usize>().unwrap());
    pages
}

#[tokio::test(start_paused = true)]
async fn test_failing_page_is_contained() {
    let provider = ScriptedProvider::new(|req| {
        if req.page_range.contains(4) {
            Err(ProviderError::Client {
                status: 400,
                message: "could not process page".into(),
            })
        } else {
            Ok(pages_json(req.page_range))
        }
    });
    let source = MemorySource { pages: 10 };
    let options = ExtractOptions::default().with_forced_chunk_size(1);

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.partial_success);
    assert_eq!(report.missing_pages, vec![4]);
    assert_eq!(report.failed_page_ranges, vec![PageRange::single(4)]);
    assert!(report.validation_error.as_deref().unwrap().contains('5'));
    assert_eq!(row_pages(&report), ["0", "1", "2", "3", "5", "6", "7", "8", "9"]);
    assert!(matches!(report.failed_chunks[0].reason, FailureReason::Provider(_)));
    assert!((report.coverage - 0.9).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_token_limit_recursion_terminates_in_page_fallback() {
    let provider = ScriptedProvider::new(|_| {
        Err(ProviderError::TokenLimitExceeded("prompt is too long".into()))
    });
    let source = MemorySource { pages: 4 };
    let options = ExtractOptions::default().with_forced_chunk_size(4);

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap();

    assert!(!report.success);
    assert!(!report.partial_success);
    // One 4-page call, two 2-page halves, four single pages, four fallback pages.
    assert_eq!(provider.calls().len(), 11);
    assert_eq!(report.metrics.resplits, 3);
    assert_eq!(report.metrics.fallback_pages, 4);
    assert_eq!(report.failed_page_ranges, vec![PageRange::new(0, 4)]);
    assert_eq!(report.missing_pages, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_document_that_fits_is_one_call() {
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    let source = MemorySource { pages: 3 };

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &ExtractOptions::default())
        .await
        .unwrap();

    assert_eq!(report.plan, ExtractionPlan::SingleCall { total_pages: 3 });
    assert_eq!(provider.calls().len(), 1);
    assert_eq!(provider.calls()[0].page_range, PageRange::new(0, 3));
    assert!(report.success && !report.partial_success);
    assert!(report.missing_pages.is_empty());
    assert_eq!(report.result.document_metadata.value("carrier_name"), Some("Aetna"));
    assert_eq!(report.token_usage_summary().actual_input_tokens, 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_overlap_rows_are_deduplicated() {
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    let source = MemorySource { pages: 6 };
    let options = ExtractOptions::default().with_forced_chunk_size(3);

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap();

    let sent: Vec<PageRange> = provider.calls().iter().map(|c| c.page_range).collect();
    assert_eq!(sent, vec![PageRange::new(0, 3), PageRange::new(2, 6)]);
    assert_eq!(row_pages(&report), ["0", "1", "2", "3", "4", "5"]);
    assert_eq!(report.result.stats.duplicates_removed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_checked_between_chunks() {
    let provider = ScriptedProvider::slow(Duration::from_secs(10), |req| Ok(pages_json(req.page_range)));
    let source = MemorySource { pages: 4 };
    let options = ExtractOptions::default()
        .with_forced_chunk_size(1)
        .with_deadline(Duration::from_secs(15));

    let err = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap_err();

    match err {
        ExtractionError::DeadlineExceeded { completed, total, .. } => {
            assert_eq!(completed, 2);
            assert_eq!(total, 4);
        }
        other => panic!("expected deadline error, got {other:?}"),
    }
    assert_eq!(provider.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_does_not_count_partly_split_chunk() {
    let provider = ScriptedProvider::slow(Duration::from_secs(10), |req| {
        if req.page_range.len() > 2 {
            Err(ProviderError::TokenLimitExceeded("prompt is too long".into()))
        } else {
            Ok(pages_json(req.page_range))
        }
    });
    let source = MemorySource { pages: 4 };
    let options = ExtractOptions::default()
        .with_forced_chunk_size(4)
        .with_deadline(Duration::from_secs(15));

    let err = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap_err();

    // The first half finished; the second never ran, so the chunk is not done.
    match err {
        ExtractionError::DeadlineExceeded { completed, total, .. } => {
            assert_eq!(completed, 0);
            assert_eq!(total, 1);
        }
        other => panic!("expected deadline error, got {other:?}"),
    }
    assert_eq!(provider.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_ceiling_resplits_chunk() {
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    // Four pages estimate to 34_375 input tokens, five to 41_250.
    let config = fast_config().with_limits(ProviderLimits {
        requests_per_minute: 10_000,
        input_tokens_per_minute: 40_000,
        output_tokens_per_minute: 1_000_000,
        max_output_tokens: 16_000,
        safety_buffer: 0.85,
    });
    let source = MemorySource { pages: 8 };
    let options = ExtractOptions::default().with_forced_chunk_size(8);

    let report = extractor(&provider, config)
        .extract_source(&source, &options)
        .await
        .unwrap();

    let sent: Vec<PageRange> = provider.calls().iter().map(|c| c.page_range).collect();
    assert_eq!(
        sent,
        vec![PageRange::new(0, 4), PageRange::new(3, 6), PageRange::new(5, 8)]
    );
    assert_eq!(report.metrics.resplits, 2);
    assert_eq!(report.metrics.fallback_pages, 0);
    assert!(report.missing_pages.is_empty());
    assert_eq!(row_pages(&report), ["0", "1", "2", "3", "4", "5", "6", "7"]);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_skips_remote_calls() {
    let provider = ScriptedProvider::new(|_| {
        Err(ProviderError::Server {
            status: 503,
            message: "unavailable".into(),
        })
    });
    let config = fast_config()
        .with_models(ModelChain::new("only-model"))
        .with_retry(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout_secs: 60,
        });
    let source = MemorySource { pages: 3 };
    let options = ExtractOptions::default().with_forced_chunk_size(1);

    let report = extractor(&provider, config)
        .extract_source(&source, &options)
        .await
        .unwrap();

    assert_eq!(provider.calls().len(), 2);
    assert!(!report.success);
    assert!(matches!(report.failed_chunks[0].reason, FailureReason::TransientNetwork(_)));
    assert!(matches!(report.failed_chunks[2].reason, FailureReason::CircuitOpen(_)));
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_response_falls_back_to_single_pages() {
    let provider = ScriptedProvider::new(|req| {
        if req.page_range.len() > 1 {
            Ok("I could not find any tables in this document.".to_string())
        } else {
            Ok(pages_json(req.page_range))
        }
    });
    let source = MemorySource { pages: 3 };

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &ExtractOptions::default())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.metrics.fallback_pages, 3);
    assert!(report.result.chunk_provenance.iter().all(|p| p.fallback));
    let registry = PromptRegistry::default();
    let compressed = &registry.lookup(None).compressed;
    assert!(provider.calls()[1..].iter().all(|c| &c.prompt == compressed));
    assert_eq!(row_pages(&report), ["0", "1", "2"]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_is_retried() {
    let attempts = Arc::new(Mutex::new(0_u32));
    let seen = Arc::clone(&attempts);
    let provider = ScriptedProvider::new(move |req| {
        let mut n = seen.lock().unwrap();
        *n += 1;
        if *n == 1 {
            Err(ProviderError::Connection("reset by peer".into()))
        } else {
            Ok(pages_json(req.page_range))
        }
    });
    let source = MemorySource { pages: 2 };

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &ExtractOptions::default())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.metrics.remote_calls, 2);
    assert_eq!(report.metrics.retries, 1);
    assert_eq!(report.metrics.backoff_wait, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_ordered_and_monotonic() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    let source = MemorySource { pages: 5 };
    let options = ExtractOptions::default().with_forced_chunk_size(2);

    extractor(&provider, fast_config())
        .with_progress(tx)
        .extract_source(&source, &options)
        .await
        .unwrap();

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(events.first().unwrap().stage, ProgressStage::Planning);
    let last = events.last().unwrap();
    assert_eq!((last.stage, last.percent), (ProgressStage::Completed, 100));
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let completed = events
        .iter()
        .filter(|e| e.stage == ProgressStage::ChunkCompleted)
        .count();
    assert_eq!(completed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_max_pages_and_mini_model() {
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    let source = MemorySource { pages: 40 };
    let options = ExtractOptions::default()
        .with_max_pages(3)
        .with_prefer_mini_model(true)
        .with_carrier("UHC");

    let report = extractor(&provider, fast_config())
        .extract_source(&source, &options)
        .await
        .unwrap();

    assert_eq!(report.total_pages, 3);
    let calls = provider.calls();
    assert_eq!(calls[0].page_range, PageRange::new(0, 3));
    assert_eq!(calls[0].model, "claude-haiku-4-5");
    assert!(calls[0].prompt.contains("UnitedHealthcare"));
}

#[tokio::test(start_paused = true)]
async fn test_metadata_scan_reads_first_page() {
    let provider = ScriptedProvider::new(|_| {
        Ok(json!({
            "document_metadata": {
                "carrier_name": "Cigna",
                "carrier_confidence": 0.8,
                "total_amount": "$1,250.00"
            }
        })
        .to_string())
    });
    let source = MemorySource { pages: 12 };
    let options = ExtractOptions::default().with_carrier("cigna");

    let metadata = extractor(&provider, fast_config())
        .extract_metadata(&source, &options)
        .await
        .unwrap();

    assert_eq!(metadata.value("carrier_name"), Some("Cigna"));
    assert_eq!(metadata.value("total_amount"), Some("$1,250.00"));
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_range, PageRange::single(0));
    assert_eq!(calls[0].prompt, PromptRegistry::default().lookup(Some("Cigna")).metadata);
}

#[test]
fn test_dry_run_plans_seventeen_pages() {
    let provider = ScriptedProvider::new(|_| unreachable!("dry run must not call the provider"));
    let (estimate, plan) = extractor(&provider, ExtractionConfig::claude())
        .estimate(17, None)
        .unwrap();

    assert!(!estimate.will_fit);
    assert_eq!(estimate.recommended_chunk_size, 3);
    let sizes: Vec<usize> = plan.chunks().iter().map(|c| c.page_count).collect();
    assert_eq!(sizes, [3, 3, 3, 3, 3, 2]);
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_empty_document_is_an_error() {
    let provider = ScriptedProvider::new(|req| Ok(pages_json(req.page_range)));
    let err = extractor(&provider, fast_config())
        .extract_source(&MemorySource { pages: 0 }, &ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractionError::EmptyDocument));
}
