use std::future::Future;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StoreError;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast, all calls rejected
    Open,
    /// Probing recovery, a call is permitted
    HalfOpen,
}

impl CircuitState {
    /// String form used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Outcome of a protected call.
#[derive(Debug)]
pub enum CircuitCallError<E> {
    /// The breaker is open; the inner function was not invoked.
    Open {
        /// Seconds until the breaker will probe recovery
        remaining_secs: i64,
    },
    /// The inner function ran and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitCallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitCallError::Open { remaining_secs } => {
                write!(f, "circuit breaker open (retry in {}s)", remaining_secs)
            }
            CircuitCallError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for CircuitCallError<E> {}

/// Errors that the breaker's retry loop may treat as worth another attempt.
pub trait Transient {
    /// Whether a retry could plausibly succeed.
    fn is_transient(&self) -> bool;
}

impl Transient for crate::error::ModelError {
    fn is_transient(&self) -> bool {
        self.retryable
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Breaker counters
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    /// Total state transitions
    pub state_changes: u64,
    /// Transitions into the open state
    pub total_trips: u64,
    /// Time of the last trip
    pub last_trip_time: Option<DateTime<Utc>>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_state_change: DateTime<Utc>,
}

type StateChangeHook = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Wraps fallible calls with a closed/open/half-open state machine.
///
/// N consecutive failures open the breaker; while open, every call fails
/// fast without invoking the protected function. After `timeout` the
/// breaker half-opens and permits a probe: a failure reopens it, K
/// consecutive successes close it. State reads take a read lock and
/// transitions a write lock; both critical sections are O(1) and never
/// perform I/O.
pub struct CircuitBreaker {
    state: RwLock<BreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    metrics: Mutex<CircuitBreakerMetrics>,
    on_state_change: Mutex<Option<StateChangeHook>>,
}

impl CircuitBreaker {
    /// Create a breaker. Zero thresholds or timeout fall back to the
    /// defaults (3 failures, 2 successes, 5 minutes).
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_state_change: Utc::now(),
            }),
            failure_threshold: if failure_threshold == 0 {
                DEFAULT_FAILURE_THRESHOLD
            } else {
                failure_threshold
            },
            success_threshold: if success_threshold == 0 {
                DEFAULT_SUCCESS_THRESHOLD
            } else {
                success_threshold
            },
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
            metrics: Mutex::new(CircuitBreakerMetrics::default()),
            on_state_change: Mutex::new(None),
        }
    }

    /// Breaker with all defaults.
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_SUCCESS_THRESHOLD,
            DEFAULT_TIMEOUT,
        )
    }

    /// Run `f` under the breaker.
    ///
    /// While open, returns [`CircuitCallError::Open`] without invoking `f`.
    /// Once the open timeout elapses the breaker half-opens and `f` runs as
    /// the recovery probe.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        {
            let guard = self.state.read().unwrap();
            if guard.state == CircuitState::Open {
                let elapsed = Utc::now() - guard.last_state_change;
                let timeout = chrono::Duration::from_std(self.timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
                if elapsed < timeout {
                    let remaining = (timeout - elapsed).num_seconds().max(0);
                    return Err(CircuitCallError::Open {
                        remaining_secs: remaining,
                    });
                }
                drop(guard);
                self.transition(CircuitState::HalfOpen);
                info!("circuit breaker half-open, probing recovery");
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "protected call failed");
                self.record_failure();
                Err(CircuitCallError::Inner(e))
            }
        }
    }

    /// Run `f` with retries, backing off 1 s, 2 s, 3 s between attempts.
    ///
    /// Non-transient errors are returned immediately; the loop also aborts
    /// the moment the breaker opens.
    pub async fn wrapped_call<T, E, F, Fut>(
        &self,
        mut f: F,
        max_retries: u32,
    ) -> Result<T, CircuitCallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + Transient,
    {
        let mut last_error = None;

        for attempt in 0..max_retries.max(1) {
            match self.call(&mut f).await {
                Ok(value) => return Ok(value),
                Err(CircuitCallError::Open { remaining_secs }) => {
                    warn!(remaining_secs, "circuit open, abandoning retries");
                    return Err(CircuitCallError::Open { remaining_secs });
                }
                Err(CircuitCallError::Inner(e)) => {
                    if !e.is_transient() {
                        return Err(CircuitCallError::Inner(e));
                    }
                    last_error = Some(e);
                }
            }

            if self.is_open() {
                warn!("circuit opened mid-retry, abandoning");
                break;
            }

            if attempt + 1 < max_retries {
                let backoff = Duration::from_secs(u64::from(attempt) + 1);
                warn!(attempt = attempt + 1, backoff_secs = backoff.as_secs(), "retrying");
                tokio::time::sleep(backoff).await;
            }
        }

        match last_error {
            Some(e) => Err(CircuitCallError::Inner(e)),
            None => {
                let guard = self.state.read().unwrap();
                let elapsed = Utc::now() - guard.last_state_change;
                let timeout =
                    chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::seconds(300));
                Err(CircuitCallError::Open {
                    remaining_secs: (timeout - elapsed).num_seconds().max(0),
                })
            }
        }
    }

    fn record_failure(&self) {
        let transition = {
            let mut guard = self.state.write().unwrap();
            guard.failure_count += 1;
            guard.success_count = 0;

            match guard.state {
                CircuitState::HalfOpen => {
                    let from = guard.state;
                    guard.state = CircuitState::Open;
                    guard.last_state_change = Utc::now();
                    Some((from, CircuitState::Open))
                }
                CircuitState::Closed if guard.failure_count >= self.failure_threshold => {
                    guard.state = CircuitState::Open;
                    guard.last_state_change = Utc::now();
                    Some((CircuitState::Closed, CircuitState::Open))
                }
                _ => None,
            }
        };

        if let Some((from, to)) = transition {
            self.note_transition(from, to);
        }
    }

    fn record_success(&self) {
        let transition = {
            let mut guard = self.state.write().unwrap();
            match guard.state {
                CircuitState::Closed => {
                    guard.failure_count = 0;
                    None
                }
                _ => {
                    guard.success_count += 1;
                    if guard.success_count >= self.success_threshold {
                        let from = guard.state;
                        guard.state = CircuitState::Closed;
                        guard.failure_count = 0;
                        guard.success_count = 0;
                        guard.last_state_change = Utc::now();
                        Some((from, CircuitState::Closed))
                    } else {
                        None
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.note_transition(from, to);
        }
    }

    fn transition(&self, new_state: CircuitState) {
        let from = {
            let mut guard = self.state.write().unwrap();
            let from = guard.state;
            guard.state = new_state;
            guard.last_state_change = Utc::now();
            from
        };
        self.note_transition(from, new_state);
    }

    /// Invoked outside any state lock.
    fn note_transition(&self, from: CircuitState, to: CircuitState) {
        info!(from = %from, to = %to, "circuit breaker state transition");

        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.state_changes += 1;
            if to == CircuitState::Open {
                metrics.total_trips += 1;
                metrics.last_trip_time = Some(Utc::now());
            }
        }

        let hook = self.on_state_change.lock().unwrap();
        if let Some(hook) = hook.as_ref() {
            hook(from, to);
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state.read().unwrap().state
    }

    /// Whether the breaker is open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the breaker is closed.
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Whether the breaker is half-open.
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Manually reset to closed.
    pub fn reset(&self) {
        let mut guard = self.state.write().unwrap();
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.last_state_change = Utc::now();
        info!("circuit breaker manually reset");
    }

    /// Register a hook invoked on every state transition, outside the
    /// state lock.
    pub fn set_on_state_change(
        &self,
        hook: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) {
        *self.on_state_change.lock().unwrap() = Some(Box::new(hook));
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.lock().unwrap().clone()
    }
}
