//! Fixed-window token bucket with three independent ceilings.
//!
//! Providers enforce requests-per-minute, input-tokens-per-minute and
//! output-tokens-per-minute separately and reject anything above them. The
//! limiter accounts all three under one lock, sleeps callers until the bucket
//! has room, and lets callers replace their estimate with the real usage once
//! the response arrives.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of one accounting window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Wait cycles a single reservation may go through before giving up.
const MAX_WAIT_CYCLES: u32 = 4;

/// Shortest sleep between reservation attempts.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Per-minute ceilings published by a provider for one API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLimits {
    /// Requests per minute.
    pub requests_per_minute: u64,
    /// Input tokens per minute. Also the largest single request the provider accepts.
    pub input_tokens_per_minute: u64,
    /// Output tokens per minute.
    pub output_tokens_per_minute: u64,
    /// Hard cap on `max_tokens` for a single request.
    pub max_output_tokens: u64,
    /// Fraction (< 1.0) of each ceiling the limiter lets callers use.
    pub safety_buffer: f64,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self::claude()
    }
}

impl ProviderLimits {
    /// Anthropic Messages API limits for a standard-tier key.
    #[must_use]
    pub const fn claude() -> Self {
        Self {
            requests_per_minute: 50,
            input_tokens_per_minute: 36_000,
            output_tokens_per_minute: 8_000,
            max_output_tokens: 8_000,
            safety_buffer: 0.85,
        }
    }

    /// `OpenAI` Responses API limits for a standard-tier key.
    #[must_use]
    pub const fn openai() -> Self {
        Self {
            requests_per_minute: 500,
            input_tokens_per_minute: 200_000,
            output_tokens_per_minute: 64_000,
            max_output_tokens: 32_000,
            safety_buffer: 0.85,
        }
    }

    /// Input ceiling after the safety buffer.
    #[must_use]
    pub fn safe_input_limit(&self) -> u64 {
        self.buffered(self.input_tokens_per_minute)
    }

    fn buffered(&self, ceiling: u64) -> u64 {
        // Epsilon keeps exact products like 36_000 * 0.85 from flooring one short.
        (ceiling as f64 * self.safety_buffer + 1e-6).floor() as u64
    }
}

/// Snapshot of the bucket counters for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucketState {
    /// Requests admitted in the current window.
    pub request_count: u64,
    /// Input tokens accounted in the current window.
    pub input_token_count: u64,
    /// Output tokens accounted in the current window.
    pub output_token_count: u64,
    /// When the current window opened.
    pub window_start: Instant,
}

impl RateBucketState {
    const fn is_empty(&self) -> bool {
        self.request_count == 0 && self.input_token_count == 0 && self.output_token_count == 0
    }
}

/// Errors raised by [`RateLimiter::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The estimate alone is above the absolute input ceiling.
    #[error("estimated input of {requested} tokens exceeds the {ceiling} tokens/min ceiling")]
    InputCeiling {
        /// Estimated input tokens.
        requested: u64,
        /// Absolute input ceiling.
        ceiling: u64,
    },
    /// The estimate alone is above the per-request output ceiling.
    #[error("estimated output of {requested} tokens exceeds the {ceiling} tokens per-request ceiling")]
    OutputCeiling {
        /// Estimated output tokens.
        requested: u64,
        /// Per-request output ceiling.
        ceiling: u64,
    },
    /// Concurrent callers kept the bucket full through every wait cycle.
    #[error("rate limit capacity unavailable after {cycles} wait cycles")]
    Saturated {
        /// Wait cycles attempted.
        cycles: u32,
    },
}

/// Capacity granted by [`RateLimiter::reserve`], handed back to [`RateLimiter::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Input tokens reserved.
    pub input_tokens: u64,
    /// Output tokens reserved.
    pub output_tokens: u64,
    /// Time spent waiting for capacity.
    pub waited: Duration,
    generation: u64,
}

#[derive(Debug)]
struct Bucket {
    state: RateBucketState,
    generation: u64,
}

/// Process-wide limiter shared by every extraction using one API key.
#[derive(Debug)]
pub struct RateLimiter {
    limits: ProviderLimits,
    window: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter with the standard 60-second window.
    #[must_use]
    pub fn new(limits: ProviderLimits) -> Self {
        Self::with_window(limits, RATE_WINDOW)
    }

    /// Creates a limiter with a custom window length.
    #[must_use]
    pub fn with_window(limits: ProviderLimits, window: Duration) -> Self {
        Self {
            limits,
            window,
            bucket: Mutex::new(Bucket {
                state: RateBucketState {
                    request_count: 0,
                    input_token_count: 0,
                    output_token_count: 0,
                    window_start: Instant::now(),
                },
                generation: 0,
            }),
        }
    }

    /// The configured ceilings.
    #[must_use]
    pub const fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    /// Current counters, after rolling the window if it has expired.
    pub async fn snapshot(&self) -> RateBucketState {
        let mut bucket = self.bucket.lock().await;
        self.roll_window(&mut bucket, Instant::now());
        bucket.state
    }

    /// Reserves capacity for one request, sleeping until the bucket has room.
    ///
    /// Requests whose estimate exceeds an absolute ceiling are rejected at once;
    /// waiting can never make them fit.
    pub async fn reserve(
        &self,
        estimated_input_tokens: u64,
        estimated_output_tokens: u64,
    ) -> Result<Reservation, RateLimitError> {
        if estimated_input_tokens > self.limits.input_tokens_per_minute {
            return Err(RateLimitError::InputCeiling {
                requested: estimated_input_tokens,
                ceiling: self.limits.input_tokens_per_minute,
            });
        }
        if estimated_output_tokens > self.limits.max_output_tokens {
            return Err(RateLimitError::OutputCeiling {
                requested: estimated_output_tokens,
                ceiling: self.limits.max_output_tokens,
            });
        }

        let started = Instant::now();
        for cycle in 0..MAX_WAIT_CYCLES {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.roll_window(&mut bucket, now);
                match self.admit(&mut bucket, estimated_input_tokens, estimated_output_tokens) {
                    Some(generation) => {
                        return Ok(Reservation {
                            input_tokens: estimated_input_tokens,
                            output_tokens: estimated_output_tokens,
                            waited: started.elapsed(),
                            generation,
                        });
                    }
                    // After one proportional wait, wait for the window itself.
                    None if cycle == 0 => self.decay_wait(
                        &bucket.state,
                        estimated_input_tokens,
                        estimated_output_tokens,
                        now,
                    ),
                    None => self.remaining(&bucket.state, now),
                }
            };

            tracing::debug!(
                event = "rate_limit_wait",
                cycle,
                wait_ms = wait.as_millis() as u64,
                estimated_input_tokens,
                estimated_output_tokens,
                "rate_limit_wait"
            );
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }

        tracing::warn!(
            event = "rate_limit_saturated",
            cycles = MAX_WAIT_CYCLES,
            "rate_limit_saturated"
        );
        Err(RateLimitError::Saturated {
            cycles: MAX_WAIT_CYCLES,
        })
    }

    /// Replaces a reservation's estimate with the usage the provider reported.
    ///
    /// Reservations from an expired window are dropped; that window's totals
    /// are already gone.
    pub async fn reconcile(&self, reservation: &Reservation, actual_input: u64, actual_output: u64) {
        let mut bucket = self.bucket.lock().await;
        self.roll_window(&mut bucket, Instant::now());
        if bucket.generation != reservation.generation {
            tracing::debug!(
                event = "rate_limit_reconcile_stale",
                actual_input,
                actual_output,
                "rate_limit_reconcile_stale"
            );
            return;
        }
        let state = &mut bucket.state;
        state.input_token_count = state
            .input_token_count
            .saturating_sub(reservation.input_tokens)
            .saturating_add(actual_input);
        state.output_token_count = state
            .output_token_count
            .saturating_sub(reservation.output_tokens)
            .saturating_add(actual_output);
    }

    fn roll_window(&self, bucket: &mut Bucket, now: Instant) {
        if now.saturating_duration_since(bucket.state.window_start) >= self.window {
            bucket.state = RateBucketState {
                request_count: 0,
                input_token_count: 0,
                output_token_count: 0,
                window_start: now,
            };
            bucket.generation = bucket.generation.wrapping_add(1);
        }
    }

    /// Increments the counters if the request fits, returning the window generation.
    fn admit(&self, bucket: &mut Bucket, input: u64, output: u64) -> Option<u64> {
        let state = &mut bucket.state;
        let fits = state.request_count.saturating_add(1)
            <= self.limits.buffered(self.limits.requests_per_minute).max(1)
            && state.input_token_count.saturating_add(input)
                <= self.limits.buffered(self.limits.input_tokens_per_minute)
            && state.output_token_count.saturating_add(output)
                <= self.limits.buffered(self.limits.output_tokens_per_minute);

        // An empty window admits anything within the absolute ceilings;
        // otherwise a request between the buffered and absolute ceiling could never run.
        if !(fits || state.is_empty()) {
            return None;
        }
        state.request_count = state.request_count.saturating_add(1);
        state.input_token_count = state.input_token_count.saturating_add(input);
        state.output_token_count = state.output_token_count.saturating_add(output);
        Some(bucket.generation)
    }

    fn remaining(&self, state: &RateBucketState, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(state.window_start))
    }

    /// Larger of the applicable waits: the window remainder for the request
    /// ceiling, a proportional share of the window for each token ceiling.
    fn decay_wait(&self, state: &RateBucketState, input: u64, output: u64, now: Instant) -> Duration {
        let remaining = self.remaining(state, now);
        let mut wait = Duration::ZERO;

        let request_cap = self.limits.buffered(self.limits.requests_per_minute).max(1);
        if state.request_count.saturating_add(1) > request_cap {
            wait = remaining;
        }
        for (used, wanted, ceiling) in [
            (state.input_token_count, input, self.limits.input_tokens_per_minute),
            (state.output_token_count, output, self.limits.output_tokens_per_minute),
        ] {
            let cap = self.limits.buffered(ceiling);
            let overage = used.saturating_add(wanted).saturating_sub(cap);
            if overage > 0 && cap > 0 {
                let share = (overage as f64 / cap as f64).min(1.0);
                wait = wait.max(self.window.mul_f64(share));
            }
        }
        wait.min(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn small_limits() -> ProviderLimits {
        ProviderLimits {
            requests_per_minute: 10,
            input_tokens_per_minute: 10_000,
            output_tokens_per_minute: 4_000,
            max_output_tokens: 2_000,
            safety_buffer: 0.8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_within_budget_is_immediate() {
        let limiter = RateLimiter::new(small_limits());
        let r = limiter.reserve(1_000, 500).await.unwrap();
        assert_eq!(r.waited, Duration::ZERO);
        let snap = limiter.snapshot().await;
        assert_eq!(snap.request_count, 1);
        assert_eq!(snap.input_token_count, 1_000);
        assert_eq!(snap.output_token_count, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_ceiling_rejects_without_waiting() {
        let limiter = RateLimiter::new(small_limits());
        let start = Instant::now();
        let err = limiter.reserve(10_001, 100).await.unwrap_err();
        assert!(matches!(err, RateLimitError::InputCeiling { requested: 10_001, .. }));
        let err = limiter.reserve(100, 2_001).await.unwrap_err();
        assert!(matches!(err, RateLimitError::OutputCeiling { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.snapshot().await.request_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_never_exceed_buffered_ceilings() {
        let limits = small_limits();
        let limiter = RateLimiter::new(limits.clone());
        let input_cap = limits.buffered(limits.input_tokens_per_minute);
        let output_cap = limits.buffered(limits.output_tokens_per_minute);
        let request_cap = limits.buffered(limits.requests_per_minute);

        // The bound holds for requests under the buffered caps. A single request
        // between a buffered and an absolute ceiling may still run alone in an
        // empty window; see test_oversized_but_legal_request_runs_alone.
        let sizes = [(3_000, 800), (2_500, 900), (4_000, 100), (1_000, 1_500), (7_000, 300)];
        assert!(sizes.iter().all(|&(i, o)| i <= input_cap && o <= output_cap));
        for round in 0..20 {
            let (input, output) = sizes[round % sizes.len()];
            limiter.reserve(input, output).await.unwrap();
            let snap = limiter.snapshot().await;
            assert!(snap.input_token_count <= input_cap);
            assert!(snap.output_token_count <= output_cap);
            assert!(snap.request_count <= request_cap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_bucket_waits_for_window() {
        let limiter = RateLimiter::new(small_limits());
        limiter.reserve(7_000, 100).await.unwrap();
        let r = limiter.reserve(7_000, 100).await.unwrap();
        assert!(r.waited > Duration::ZERO);
        assert!(r.waited <= RATE_WINDOW);
        // The second reservation landed in a fresh window.
        let snap = limiter.snapshot().await;
        assert_eq!(snap.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_ceiling_waits() {
        let limiter = RateLimiter::new(small_limits());
        for _ in 0..8 {
            limiter.reserve(10, 10).await.unwrap();
        }
        let r = limiter.reserve(10, 10).await.unwrap();
        assert!(r.waited >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_replaces_estimate() {
        let limiter = RateLimiter::new(small_limits());
        let r = limiter.reserve(4_000, 1_000).await.unwrap();
        limiter.reconcile(&r, 3_100, 250).await;
        let snap = limiter.snapshot().await;
        assert_eq!(snap.input_token_count, 3_100);
        assert_eq!(snap.output_token_count, 250);
        assert_eq!(snap.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_after_rollover_is_ignored() {
        let limiter = RateLimiter::new(small_limits());
        let r = limiter.reserve(4_000, 1_000).await.unwrap();
        tokio::time::advance(RATE_WINDOW + Duration::from_secs(1)).await;
        limiter.reconcile(&r, 3_100, 250).await;
        let snap = limiter.snapshot().await;
        assert_eq!(snap.input_token_count, 0);
        assert_eq!(snap.output_token_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_but_legal_request_runs_alone() {
        // 9_000 is above the 8_000 buffered cap but below the 10_000 ceiling.
        let limiter = RateLimiter::new(small_limits());
        let r = limiter.reserve(9_000, 100).await.unwrap();
        assert_eq!(r.waited, Duration::ZERO);
        let second = limiter.reserve(100, 100).await.unwrap();
        assert!(second.waited > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reservations_respect_ceiling() {
        let limiter = Arc::new(RateLimiter::new(small_limits()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.reserve(3_000, 100).await }));
        }
        let mut immediate = 0;
        for handle in handles {
            let r = handle.await.unwrap().unwrap();
            if r.waited == Duration::ZERO {
                immediate += 1;
            }
        }
        // Only two 3_000-token requests fit under the 8_000 buffered cap.
        assert_eq!(immediate, 2);
    }
}
