//! Retry with backoff for transient backend failures
//!
//! The retry condition is supplied by the caller, so a policy never decides
//! on its own which errors are worth another attempt.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial_delay × n` before the n-th retry
    #[default]
    Linear,
    /// `initial_delay × multiplier^(n - 1)` before the n-th retry
    Exponential,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Growth factor of the exponential strategy
    pub multiplier: f64,
    /// Growth strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            strategy: BackoffStrategy::Linear,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the exponential growth factor
    pub fn multiplier(mut self, mult: f64) -> Self {
        self.multiplier = mult.max(1.0);
        self
    }

    /// Set the growth strategy
    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = match self.strategy {
            BackoffStrategy::Linear => f64::from(retry.max(1)),
            BackoffStrategy::Exponential => self.multiplier.powi(retry.saturating_sub(1) as i32),
        };
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Iterator-like schedule of retry delays
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    retries: u32,
}

impl Backoff {
    /// Start a fresh schedule
    pub fn new(config: RetryConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// Delay before the next retry, or `None` once retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.config.delay_for(self.retries))
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Runs an operation until it succeeds, fails for good, or runs out of retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry every failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(operation, |_| true).await
    }

    /// Retry failures accepted by `should_retry`; others return at once
    pub async fn execute_if<F, Fut, T, E, C>(
        &self,
        mut operation: F,
        should_retry: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
    {
        let mut backoff = Backoff::new(self.config.clone());

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !should_retry(&err) {
                return Err(err);
            }
            let Some(delay) = backoff.next_delay() else {
                return Err(err);
            };
            debug!(
                retry = backoff.retries(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying backend call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_linear_schedule() {
        let config = RetryConfig::default()
            .max_retries(3)
            .initial_delay(Duration::from_millis(100));
        let mut backoff = Backoff::new(config);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(300)));
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_exponential_schedule() {
        let config = RetryConfig::default()
            .initial_delay(Duration::from_millis(100))
            .strategy(BackoffStrategy::Exponential);

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .strategy(BackoffStrategy::Exponential);

        assert_eq!(config.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_default_is_two_linear_retries() {
        let mut backoff = Backoff::new(RetryConfig::default());
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let mut attempts = 0;

        let result: Result<i32, &str> = quick(3)
            .execute(|| {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 2 {
                        Err("fail")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let mut attempts = 0;

        let result: Result<(), &str> = quick(5)
            .execute_if(
                || {
                    attempts += 1;
                    async { Err("timeout") }
                },
                |e| *e != "timeout",
            )
            .await;

        assert_eq!(result, Err("timeout"));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut attempts = 0;

        let result: Result<(), &str> = quick(2)
            .execute(|| {
                attempts += 1;
                async { Err("down") }
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(attempts, 3);
    }
}
