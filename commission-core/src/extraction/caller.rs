//! One bounded unit of remote work: a page range, one prompt, a model chain.

use std::sync::Arc;
use std::time::Duration;

use super::config::RetryPolicy;
use super::metrics::CallMetrics;
use super::outcome::{ChunkSuccess, ExtractionOutcome, FailureReason};
use crate::breaker::CircuitBreaker;
use crate::estimator::{EstimationMode, TokenEstimator};
use crate::parser::ResponseParser;
use crate::provider::{is_token_limit_message, LlmProvider, LlmRequest, ModelChain, ProviderError};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::source::{ChunkFile, PageSource};
use crate::types::PageRange;

/// What to send for one call.
#[derive(Debug, Clone, Copy)]
pub struct ChunkCall<'a> {
    /// Pages to send.
    pub range: PageRange,
    /// Instruction text.
    pub prompt: &'a str,
    /// Estimation mode for the pre-call reservation.
    pub mode: EstimationMode,
    /// Models to try in order.
    pub models: &'a ModelChain,
}

/// Performs rate-limited, breaker-guarded provider calls with retry.
///
/// This is the only place that spends rate-limiter budget or touches the network.
pub struct ExtractionCaller {
    provider: Arc<dyn LlmProvider>,
    parser: Arc<dyn ResponseParser>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    estimator: TokenEstimator,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl std::fmt::Debug for ExtractionCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionCaller")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ExtractionCaller {
    /// Creates a caller.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        parser: Arc<dyn ResponseParser>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        estimator: TokenEstimator,
    ) -> Self {
        Self {
            provider,
            parser,
            limiter,
            breaker,
            estimator,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(300),
        }
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Extracts one page range, walking the model chain on non-recoverable failures.
    ///
    /// The materialized chunk file lives for the duration of this call and is
    /// removed when it returns, whatever the outcome.
    pub async fn call(
        &self,
        source: &dyn PageSource,
        call: ChunkCall<'_>,
    ) -> (ExtractionOutcome, CallMetrics) {
        let mut metrics = CallMetrics::default();
        let chunk = match source.materialize(call.range).await {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(
                    event = "chunk_materialize_failed",
                    range = %call.range,
                    error = %e,
                    "chunk_materialize_failed"
                );
                return (
                    ExtractionOutcome::failure(FailureReason::Source(e.to_string())),
                    metrics,
                );
            }
        };

        let mut tried: Vec<String> = Vec::new();
        let mut last = None;
        while let Some(model) = call.models.next_untried(&tried) {
            let outcome = self.call_model(&chunk, call, model, &mut metrics).await;
            // Size, parse and breaker failures are for the controller; another model won't help.
            let final_here = match &outcome {
                ExtractionOutcome::Success(_) => true,
                ExtractionOutcome::Failure { reason, .. } => {
                    reason.is_recoverable()
                        || matches!(reason, FailureReason::CircuitOpen(_) | FailureReason::Source(_))
                }
            };
            if final_here {
                return (outcome, metrics);
            }
            if let ExtractionOutcome::Failure { reason, .. } = &outcome {
                tracing::warn!(
                    event = "model_fallback",
                    model,
                    range = %call.range,
                    reason = %reason,
                    "model_fallback"
                );
            }
            tried.push(model.to_string());
            last = Some(outcome);
        }

        let outcome = last.unwrap_or_else(|| {
            ExtractionOutcome::failure(FailureReason::Provider("no models configured".to_string()))
        });
        (outcome, metrics)
    }

    async fn call_model(
        &self,
        chunk: &ChunkFile,
        call: ChunkCall<'_>,
        model: &str,
        metrics: &mut CallMetrics,
    ) -> ExtractionOutcome {
        let estimate = self.estimator.estimate(call.range.len(), call.mode);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_failure = FailureReason::Provider("no attempt made".to_string());

        for attempt in 0..max_attempts {
            if let Err(open) = self.breaker.acquire().await {
                return ExtractionOutcome::failure(FailureReason::CircuitOpen(open.retry_in));
            }

            let reservation = match self
                .limiter
                .reserve(estimate.estimated_input_tokens, estimate.estimated_output_tokens)
                .await
            {
                Ok(reservation) => reservation,
                Err(e) => return ExtractionOutcome::failure(limiter_failure(&e)),
            };
            metrics.rate_limit_wait = metrics.rate_limit_wait.saturating_add(reservation.waited);
            metrics.remote_calls = metrics.remote_calls.saturating_add(1);
            if attempt > 0 {
                metrics.retries = metrics.retries.saturating_add(1);
            }
            metrics.token_usage.estimated_input_tokens = metrics
                .token_usage
                .estimated_input_tokens
                .saturating_add(reservation.input_tokens);
            metrics.token_usage.estimated_output_tokens = metrics
                .token_usage
                .estimated_output_tokens
                .saturating_add(reservation.output_tokens);

            let request = LlmRequest {
                model: model.to_string(),
                prompt: call.prompt.to_string(),
                document: chunk.bytes().to_vec(),
                page_range: call.range,
                max_output_tokens: self.limiter.limits().max_output_tokens,
            };
            tracing::debug!(
                event = "provider_request",
                provider = self.provider.name(),
                model,
                range = %call.range,
                attempt,
                estimated_input_tokens = reservation.input_tokens,
                "provider_request"
            );

            let result = tokio::time::timeout(self.request_timeout, self.provider.complete(request))
                .await
                .unwrap_or(Err(ProviderError::Timeout(self.request_timeout)));

            let err = match result {
                Ok(response) => {
                    self.limiter
                        .reconcile(&reservation, response.input_tokens, response.output_tokens)
                        .await;
                    self.breaker.record_success().await;
                    metrics.token_usage.actual_input_tokens = metrics
                        .token_usage
                        .actual_input_tokens
                        .saturating_add(response.input_tokens);
                    metrics.token_usage.actual_output_tokens = metrics
                        .token_usage
                        .actual_output_tokens
                        .saturating_add(response.output_tokens);

                    return match self.parser.parse(&response.text) {
                        Ok(payload) => ExtractionOutcome::Success(ChunkSuccess {
                            tables: payload.tables,
                            document_metadata: payload.document_metadata,
                            entities: payload.groups_and_companies,
                            token_usage: metrics.token_usage,
                            model: response.model,
                        }),
                        Err(e) => {
                            tracing::warn!(
                                event = "response_parse_failed",
                                range = %call.range,
                                error = %e,
                                "response_parse_failed"
                            );
                            ExtractionOutcome::failure(FailureReason::ParseFailure(e.to_string()))
                        }
                    };
                }
                Err(err) => err,
            };

            let delay = match err {
                ProviderError::TokenLimitExceeded(message) => {
                    self.limiter.reconcile(&reservation, 0, 0).await;
                    return ExtractionOutcome::failure(FailureReason::TokenLimitExceeded(message));
                }
                ProviderError::Client { status, message } => {
                    self.limiter.reconcile(&reservation, 0, 0).await;
                    if is_token_limit_message(&message) {
                        return ExtractionOutcome::failure(FailureReason::TokenLimitExceeded(message));
                    }
                    return ExtractionOutcome::failure(FailureReason::Provider(format!(
                        "{status}: {message}"
                    )));
                }
                ProviderError::RateLimited { retry_after } => {
                    self.limiter.reconcile(&reservation, 0, 0).await;
                    last_failure = FailureReason::RateLimitExceeded(
                        ProviderError::RateLimited { retry_after }.to_string(),
                    );
                    retry_after.unwrap_or_else(|| self.retry.backoff_delay(attempt))
                }
                transient => {
                    // Connection drops and 5xx count against the breaker; timeouts too.
                    self.breaker.record_failure().await;
                    last_failure = FailureReason::TransientNetwork(transient.to_string());
                    self.retry.backoff_delay(attempt)
                }
            };

            if attempt.saturating_add(1) < max_attempts {
                tracing::warn!(
                    event = "chunk_retry",
                    model,
                    range = %call.range,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %last_failure,
                    "chunk_retry"
                );
                tokio::time::sleep(delay).await;
                metrics.backoff_wait = metrics.backoff_wait.saturating_add(delay);
            }
        }

        ExtractionOutcome::failure(last_failure)
    }
}

/// A ceiling rejection means the chunk is too big; saturation means try later.
fn limiter_failure(err: &RateLimitError) -> FailureReason {
    match err {
        RateLimitError::InputCeiling { .. } | RateLimitError::OutputCeiling { .. } => {
            FailureReason::TokenLimitExceeded(err.to_string())
        }
        RateLimitError::Saturated { .. } => FailureReason::RateLimitExceeded(err.to_string()),
    }
}
