//! Configuration for document extraction: estimator constants, provider
//! limits, retry/backoff, circuit breaker, chunking and time budgets.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ExtractionError;
use crate::breaker::BreakerConfig;
use crate::estimator::EstimatorConfig;
use crate::planner::ChunkingConfig;
use crate::provider::ModelChain;
use crate::rate_limit::ProviderLimits;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// Retry behavior for transient and rate-limit failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per model, including the first (default: 3).
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based): `min(base * 2^retry, max)` plus jitter.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(retry));
        let capped = exponential.min(self.max_delay_ms);

        let jitter_range = capped as f64 * self.jitter_factor.clamp(0.0, 1.0);
        let jitter_ms = if jitter_range >= 1.0 {
            rand::thread_rng().gen_range(0.0..jitter_range).floor() as u64
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter_ms))
    }
}

/// Full configuration for a [`DocumentExtractor`](crate::DocumentExtractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Token estimation constants.
    pub estimator: EstimatorConfig,
    /// Provider rate limits.
    pub limits: ProviderLimits,
    /// Retry/backoff policy.
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Chunk sizing and recursion.
    pub chunking: ChunkingConfig,
    /// Models to try, primary first.
    pub models: ModelChain,
    /// Cheaper model moved to the front when a caller prefers it.
    pub mini_model: Option<String>,
    /// Wall-clock bound on one provider call, in seconds.
    pub request_timeout_secs: u64,
    /// Optional wall-clock budget for a whole document, in seconds.
    pub deadline_secs: Option<u64>,
    /// Fraction of pages that must be covered for the extraction to count as a success.
    pub min_coverage: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::claude()
    }
}

impl ExtractionConfig {
    /// Defaults for the Anthropic Messages API.
    #[must_use]
    pub fn claude() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            limits: ProviderLimits::claude(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            chunking: ChunkingConfig::default(),
            models: ModelChain::new("claude-sonnet-4-5").with_fallback("claude-3-7-sonnet-latest"),
            mini_model: Some("claude-haiku-4-5".to_string()),
            request_timeout_secs: 300,
            deadline_secs: None,
            min_coverage: 0.0,
        }
    }

    /// Defaults for the `OpenAI` Responses API.
    #[must_use]
    pub fn openai() -> Self {
        Self {
            limits: ProviderLimits::openai(),
            models: ModelChain::new("gpt-5").with_fallback("gpt-4.1"),
            mini_model: Some("gpt-5-mini".to_string()),
            request_timeout_secs: 600,
            ..Self::claude()
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whole-document deadline, when configured.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Model chain for one extraction, with the mini model first if requested.
    #[must_use]
    pub fn model_chain(&self, prefer_mini: bool) -> ModelChain {
        match (&self.mini_model, prefer_mini) {
            (Some(mini), true) => self.models.preferring(mini),
            _ => self.models.clone(),
        }
    }

    /// Rejects values the controller cannot work with.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let invalid = |msg: &str| Err(ExtractionError::Config(msg.to_string()));
        if !(self.limits.safety_buffer > 0.0 && self.limits.safety_buffer < 1.0) {
            return invalid("limits.safety_buffer must be between 0 and 1 (exclusive)");
        }
        if self.estimator.safety_multiplier < 1.0 {
            return invalid("estimator.safety_multiplier must be at least 1.0");
        }
        if self.chunking.max_chunk_size == 0 {
            return invalid("chunking.max_chunk_size must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return invalid("min_coverage must be between 0.0 and 1.0");
        }
        if self.models.models().is_empty() {
            return invalid("models must name at least one model");
        }
        Ok(())
    }

    /// Set the provider limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the circuit breaker thresholds.
    #[must_use]
    pub const fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Set the chunking behavior.
    #[must_use]
    pub const fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Set the model chain.
    #[must_use]
    pub fn with_models(mut self, models: ModelChain) -> Self {
        self.models = models;
        self
    }

    /// Set the per-request timeout in seconds.
    #[must_use]
    pub const fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the whole-document deadline in seconds.
    #[must_use]
    pub const fn with_deadline_secs(mut self, secs: Option<u64>) -> Self {
        self.deadline_secs = secs;
        self
    }

    /// Set the minimum covered-page fraction.
    #[must_use]
    pub fn with_min_coverage(mut self, fraction: f64) -> Self {
        self.min_coverage = fraction.clamp(0.0, 1.0);
        self
    }
}
