//! Pre-call token estimation for page ranges.
//!
//! Vision models bill rendered PDF pages by image area, so the caller never
//! sees the real count until the response arrives. The estimator works from
//! per-page and per-prompt constants observed in production and pads them
//! with a safety multiplier.

use serde::{Deserialize, Serialize};

use crate::rate_limit::ProviderLimits;

/// Which kind of request a page range is estimated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMode {
    /// Full table extraction over dense statement pages.
    Standard,
    /// Header/metadata scan of the first page(s).
    Metadata,
}

/// How close an estimate runs to the input ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Within the safety-buffered limit.
    Safe,
    /// Over the buffered limit but under the absolute ceiling.
    Warning,
    /// Over the absolute ceiling; the provider will reject it.
    Critical,
}

/// Calibrated token costs for one [`EstimationMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCost {
    /// Input tokens per rendered page.
    pub tokens_per_page: u64,
    /// Fixed input tokens for the prompt and request framing.
    pub prompt_overhead_tokens: u64,
    /// Expected output tokens per page.
    pub output_tokens_per_page: u64,
    /// Fixed output tokens (JSON envelope, metadata block).
    pub output_overhead_tokens: u64,
}

/// Estimator constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Costs for table extraction.
    pub standard: PageCost,
    /// Costs for metadata-only scans.
    pub metadata: PageCost,
    /// Multiplier (> 1.0) covering encoding overhead and tokenizer variance.
    pub safety_multiplier: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            standard: PageCost {
                tokens_per_page: 5_500,
                prompt_overhead_tokens: 5_500,
                output_tokens_per_page: 1_200,
                output_overhead_tokens: 500,
            },
            metadata: PageCost {
                tokens_per_page: 2_000,
                prompt_overhead_tokens: 1_500,
                output_tokens_per_page: 100,
                output_overhead_tokens: 800,
            },
            safety_multiplier: 1.25,
        }
    }
}

impl EstimatorConfig {
    /// Returns the cost table for `mode`.
    #[must_use]
    pub const fn cost(&self, mode: EstimationMode) -> &PageCost {
        match mode {
            EstimationMode::Standard => &self.standard,
            EstimationMode::Metadata => &self.metadata,
        }
    }
}

/// Result of a single estimation. Immutable and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    /// Padded input token estimate.
    pub estimated_input_tokens: u64,
    /// Output token estimate, capped at the per-request output ceiling.
    pub estimated_output_tokens: u64,
    /// Absolute input ceiling scaled by the safety buffer.
    pub safe_limit: u64,
    /// Whether the request fits under `safe_limit`.
    pub will_fit: bool,
    /// Pages per call that fit the budget (at least 1).
    pub recommended_chunk_size: usize,
    /// Raw pages-per-call capacity; `0` when not even one page fits.
    pub page_capacity: usize,
    /// Classification against the buffered and absolute limits.
    pub risk_level: RiskLevel,
}

/// Pure mapping from page counts to [`TokenEstimate`]s.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    config: EstimatorConfig,
    absolute_input_ceiling: u64,
    safe_limit: u64,
    max_output_tokens: u64,
}

impl TokenEstimator {
    /// Builds an estimator for the given provider limits.
    #[must_use]
    pub fn new(config: EstimatorConfig, limits: &ProviderLimits) -> Self {
        Self {
            config,
            absolute_input_ceiling: limits.input_tokens_per_minute,
            safe_limit: limits.safe_input_limit(),
            max_output_tokens: limits.max_output_tokens,
        }
    }

    /// The safety-buffered input limit.
    #[must_use]
    pub const fn safe_limit(&self) -> u64 {
        self.safe_limit
    }

    /// Estimates a request over `num_pages` pages.
    #[must_use]
    pub fn estimate(&self, num_pages: usize, mode: EstimationMode) -> TokenEstimate {
        let cost = self.config.cost(mode);
        let multiplier = self.config.safety_multiplier;
        let pages = num_pages as u64;

        let base_estimate = pages
            .saturating_mul(cost.tokens_per_page)
            .saturating_add(cost.prompt_overhead_tokens);
        let estimated_input_tokens = pad(base_estimate, multiplier);

        let estimated_output_tokens = pages
            .saturating_mul(cost.output_tokens_per_page)
            .saturating_add(cost.output_overhead_tokens)
            .min(self.max_output_tokens);

        let overhead_with_safety = cost.prompt_overhead_tokens as f64 * multiplier;
        let per_page_with_safety = cost.tokens_per_page as f64 * multiplier;
        let page_capacity = if per_page_with_safety > 0.0 {
            ((self.safe_limit as f64 - overhead_with_safety).max(0.0) / per_page_with_safety)
                .floor() as usize
        } else {
            num_pages.max(1)
        };

        let will_fit = estimated_input_tokens <= self.safe_limit;
        let risk_level = if will_fit {
            RiskLevel::Safe
        } else if estimated_input_tokens <= self.absolute_input_ceiling {
            RiskLevel::Warning
        } else {
            RiskLevel::Critical
        };

        TokenEstimate {
            estimated_input_tokens,
            estimated_output_tokens,
            safe_limit: self.safe_limit,
            will_fit,
            recommended_chunk_size: page_capacity.max(1),
            page_capacity,
            risk_level,
        }
    }
}

fn pad(tokens: u64, multiplier: f64) -> u64 {
    (tokens as f64 * multiplier).ceil() as u64
}
