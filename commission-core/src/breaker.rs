//! Circuit breaker around the remote extraction path.
//!
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls fail fast until the timeout since the last failure elapses
//! - Half-Open: calls pass through again; enough successes close the circuit,
//!   a single failure reopens it

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting calls.
    Open,
    /// Probing for recovery.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open that close it again.
    pub success_threshold: u32,
    /// Seconds after the last failure before a probe is allowed.
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BreakerConfig {
    /// Open-state timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Returned instead of attempting a call while the circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open: remote API considered unavailable for another {retry_in:?}")]
pub struct CircuitOpen {
    /// Time until a probe call is allowed.
    pub retry_in: Duration,
}

/// Error from [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was not attempted.
    #[error(transparent)]
    Open(#[from] CircuitOpen),
    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Current state, without triggering the open-to-half-open transition.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Admits a call or fails fast. Moves an expired open circuit to half-open.
    pub async fn acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let since = inner
                    .last_failure_time
                    .map_or(Duration::MAX, |t| t.elapsed());
                let timeout = self.config.timeout();
                if since >= timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    tracing::info!(event = "circuit_half_open", "circuit_half_open");
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_in: timeout.saturating_sub(since),
                    })
                }
            }
        }
    }

    /// Records a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    tracing::info!(event = "circuit_closed", "circuit_closed");
                }
            }
            // A call admitted before the circuit opened; it says nothing new.
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        event = "circuit_opened",
                        failures = inner.failure_count,
                        "circuit_opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                tracing::warn!(event = "circuit_reopened", "circuit_reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `f` through the breaker, counting any `Err` as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire().await?;
        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }
}
