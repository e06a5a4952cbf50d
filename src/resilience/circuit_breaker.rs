//! Circuit breaker protecting the forecasting backend
//!
//! Stops retry storms against a degraded backend: once the failures inside
//! the sliding window reach the threshold every call fails fast until the
//! cooldown passes, then a single trial call decides whether to close again.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed = 0,
    /// Calls are rejected without reaching the backend
    Open = 1,
    /// A trial call is allowed through
    HalfOpen = 2,
}

impl CircuitState {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside `failure_window` that open the circuit
    pub failure_threshold: u32,
    /// Sliding window in which failures count
    pub failure_window: Duration,
    /// Cooldown before an open circuit admits a trial
    pub reset_timeout: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set failure window
    pub fn failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Set reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the number of trial calls admitted while half-open
    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = max.max(1);
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trials: u32,
    // Bumped on every transition; outcomes admitted under an older value
    // are ignored.
    generation: u64,
}

impl BreakerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) <= window {
                break;
            }
            self.failures.pop_front();
        }
    }
}

/// Circuit breaker shared by every backend call of a process
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trials: 0,
                generation: 0,
            }),
        }
    }

    /// Current state, moving an expired open circuit to half-open
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Admit or reject one call
    pub fn allow_request(&self) -> bool {
        self.try_acquire().is_some()
    }

    /// Admit one call, returning the generation it was admitted under
    fn try_acquire(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Some(inner.generation),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.trials < self.config.half_open_max_requests {
                    inner.trials += 1;
                    Some(inner.generation)
                } else {
                    None
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.on_success(&mut inner);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.on_failure(&mut inner, Instant::now());
    }

    /// Run `f` under the breaker.
    ///
    /// When the circuit rejects the call the future is dropped without
    /// being polled. An outcome that arrives after the circuit has moved on
    /// (tripped, or started a new trial) does not change its state.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let Some(generation) = self.try_acquire() else {
            return Err(CircuitBreakerError::Open);
        };

        let result = f.await;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(
                name = %self.name,
                admitted = generation,
                current = inner.generation,
                "Ignoring outcome of an earlier breaker generation"
            );
        } else if result.is_ok() {
            self.on_success(&mut inner);
        } else {
            self.on_failure(&mut inner, Instant::now());
        }
        drop(inner);

        result.map_err(CircuitBreakerError::ServiceError)
    }

    /// Failures currently inside the window
    pub fn failure_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.prune(Instant::now(), self.config.failure_window);
        inner.failures.len()
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Close the circuit and forget all failures
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        Self::close(&mut inner);
        info!(name = %self.name, "Circuit breaker reset");
    }

    fn on_success(&self, inner: &mut BreakerState) {
        match inner.state {
            CircuitState::Closed => inner.failures.clear(),
            CircuitState::HalfOpen => {
                Self::close(inner);
                info!(name = %self.name, "Circuit breaker closed");
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                inner.prune(now, self.config.failure_window);
                inner.failures.push_back(now);
                let failures = inner.failures.len();
                debug!(name = %self.name, failures, "Circuit breaker recorded failure");
                if failures >= self.config.failure_threshold as usize {
                    Self::trip(inner, now);
                    warn!(
                        name = %self.name,
                        failures,
                        cooldown_ms = self.config.reset_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::trip(inner, now);
                warn!(name = %self.name, "Circuit breaker trial failed, reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn close(inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.trials = 0;
        inner.generation += 1;
    }

    fn trip(inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trials = 0;
        inner.generation += 1;
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let expired = inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
        if expired {
            inner.state = CircuitState::HalfOpen;
            inner.trials = 0;
            inner.generation += 1;
            debug!(name = %self.name, "Circuit breaker half-open");
        }
    }
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call never ran
    Open,
    /// The wrapped call failed
    ServiceError(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open => write!(f, "circuit is open"),
            CircuitBreakerError::ServiceError(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_circuit_breaker_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_opens_on_failures() {
        let config = CircuitBreakerConfig::default().failure_threshold(3);
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let config = CircuitBreakerConfig::default().failure_threshold(3);
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_failures_do_not_accumulate() {
        let config = CircuitBreakerConfig::default()
            .failure_threshold(2)
            .failure_window(Duration::from_millis(20));
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_wrapped_future() {
        let cb = CircuitBreaker::new("test", fast_config(2));
        let invocations = AtomicUsize::new(0);

        for _ in 0..2 {
            let _ = cb
                .call(async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb
            .call(async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        cb.record_failure();
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_trial_success_closes() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_cooldown() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.allow_request());
    }

    #[test]
    fn test_failures_expire_from_window() {
        let config = CircuitBreakerConfig::default()
            .failure_threshold(3)
            .failure_window(Duration::from_millis(30));
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_override_trial() {
        let cb = CircuitBreaker::new("test", fast_config(1));

        let late = cb.call(async {
            tokio::time::sleep(Duration::from_millis(90)).await;
            Err::<(), _>("late")
        });
        tokio::pin!(late);
        // Admitted while the circuit is still closed
        assert!(futures::poll!(late.as_mut()).is_pending());

        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let trial = cb.call(async {
            tokio::time::sleep(Duration::from_millis(45)).await;
            Ok::<_, &str>(())
        });
        let (late, trial) = tokio::join!(late, trial);

        assert!(matches!(late, Err(CircuitBreakerError::ServiceError("late"))));
        assert!(trial.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_late_success_does_not_close_before_trial() {
        let cb = CircuitBreaker::new("test", fast_config(1));

        let late = cb.call(async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok::<_, &str>(())
        });
        tokio::pin!(late);
        assert!(futures::poll!(late.as_mut()).is_pending());

        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let trial = cb.call(async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Err::<(), _>("still down")
        });
        let (late, trial) = tokio::join!(late, trial);

        assert!(late.is_ok());
        assert!(trial.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let config = CircuitBreakerConfig::default().failure_threshold(2);
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }
}
