//! Token usage and per-extraction counters.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::time::Duration;

/// Estimated versus billed tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens reserved from estimates.
    pub estimated_input_tokens: u64,
    /// Output tokens reserved from estimates.
    pub estimated_output_tokens: u64,
    /// Input tokens the provider billed.
    pub actual_input_tokens: u64,
    /// Output tokens the provider billed.
    pub actual_output_tokens: u64,
}

impl TokenUsage {
    /// Billed input plus output.
    #[must_use]
    pub const fn total_actual(&self) -> u64 {
        self.actual_input_tokens.saturating_add(self.actual_output_tokens)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.estimated_input_tokens = self.estimated_input_tokens.saturating_add(rhs.estimated_input_tokens);
        self.estimated_output_tokens = self.estimated_output_tokens.saturating_add(rhs.estimated_output_tokens);
        self.actual_input_tokens = self.actual_input_tokens.saturating_add(rhs.actual_input_tokens);
        self.actual_output_tokens = self.actual_output_tokens.saturating_add(rhs.actual_output_tokens);
    }
}

/// Counters collected during one document extraction.
///
/// Built up by the controller and returned in the report; nothing here is
/// shared between extractions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    /// Requests sent to the provider.
    pub remote_calls: usize,
    /// Requests repeated after a transient or rate-limit failure.
    pub retries: usize,
    /// Chunks split after a token-limit failure.
    pub resplits: usize,
    /// Pages attempted through page-by-page fallback.
    pub fallback_pages: usize,
    /// Chunks recorded as terminally failed.
    pub terminal_failures: usize,
    /// Time spent waiting on the rate limiter.
    pub rate_limit_wait: Duration,
    /// Time spent in retry backoff.
    pub backoff_wait: Duration,
    /// Wall-clock time of the whole extraction.
    pub wall_time: Duration,
    /// Token totals.
    pub token_usage: TokenUsage,
}

impl ExtractionMetrics {
    /// Folds the counters of one call into the running totals.
    pub fn absorb(&mut self, call: &CallMetrics) {
        self.remote_calls = self.remote_calls.saturating_add(call.remote_calls);
        self.retries = self.retries.saturating_add(call.retries);
        self.rate_limit_wait = self.rate_limit_wait.saturating_add(call.rate_limit_wait);
        self.backoff_wait = self.backoff_wait.saturating_add(call.backoff_wait);
        self.token_usage += call.token_usage;
    }
}

/// Counters for one [`ExtractionCaller::call`](super::ExtractionCaller::call).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallMetrics {
    /// Requests sent.
    pub remote_calls: usize,
    /// Retries after the first request.
    pub retries: usize,
    /// Rate limiter wait.
    pub rate_limit_wait: Duration,
    /// Backoff sleep.
    pub backoff_wait: Duration,
    /// Tokens for this call.
    pub token_usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_accumulates() {
        let call = CallMetrics {
            remote_calls: 2,
            retries: 1,
            rate_limit_wait: Duration::from_secs(3),
            backoff_wait: Duration::from_secs(1),
            token_usage: TokenUsage {
                estimated_input_tokens: 100,
                estimated_output_tokens: 10,
                actual_input_tokens: 90,
                actual_output_tokens: 12,
            },
        };
        let mut metrics = ExtractionMetrics::default();
        metrics.absorb(&call);
        metrics.absorb(&call);
        assert_eq!(metrics.remote_calls, 4);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.rate_limit_wait, Duration::from_secs(6));
        assert_eq!(metrics.token_usage.actual_input_tokens, 180);
        assert_eq!(metrics.token_usage.total_actual(), 204);
    }
}
