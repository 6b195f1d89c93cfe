use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Thread-safe three-state circuit breaker shared by all users of one
/// provider instance.
///
/// CLOSED -> OPEN after `failure_threshold` consecutive failures;
/// OPEN -> HALF_OPEN once `recovery_timeout` elapses; HALF_OPEN -> CLOSED
/// on success, back to OPEN on a failed probe.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    /// Current state, applying the automatic OPEN -> HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.roll_over(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Fast-fail before touching the network when the circuit is open.
    pub fn pre_request(&self) -> Result<(), AppError> {
        let mut inner = self.lock();
        self.roll_over(&mut inner);

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or_default();
            let retry_after = self.recovery_timeout.saturating_sub(elapsed);
            return Err(AppError::CircuitOpen {
                provider: self.name.clone(),
                retry_after_secs: retry_after.as_secs(),
            });
        }
        // CLOSED or HALF_OPEN: the request is allowed through
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        if previous != CircuitState::Closed {
            info!(breaker = %self.name, ?previous, "Circuit breaker closed after success");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            warn!(breaker = %self.name, "Circuit breaker reopened, half-open probe failed");
        } else if inner.consecutive_failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Manual reset to CLOSED, clearing the failure counter.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state();
        let inner = self.lock();
        BreakerStatus {
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
        }
    }

    fn roll_over(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(self.recovery_timeout);
            if elapsed >= self.recovery_timeout {
                inner.state = CircuitState::HalfOpen;
                info!(breaker = %self.name, "Circuit breaker half-open, recovery timeout elapsed");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker lock means a panic mid-transition; the state
        // data is still a plain struct, so keep going with it.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
