//! Resilience patterns for the forecasting backend
//!
//! Provides circuit breaker, retry and bounded request queue.

pub mod circuit_breaker;
pub mod queue;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use queue::{QueueConfig, RequestQueue};
pub use retry::{Backoff, BackoffStrategy, RetryConfig, RetryPolicy};
