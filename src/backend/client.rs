//! Resilient client for the forecasting backend
//!
//! Every logical call passes the circuit breaker first, then waits for a
//! queue slot, then runs the retry loop with a per-attempt timeout.

use super::{BaselineRequest, BaselineResponse, BoxedTransport, Endpoint};
use crate::error::{BaselineError, Result};
use crate::metrics::{BaselineMetrics, Timer};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backend client with timeout, retry and circuit breaking
pub struct BaselineClient {
    transport: BoxedTransport,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: Option<Arc<BaselineMetrics>>,
}

impl BaselineClient {
    /// Create a new client
    pub fn new(
        transport: BoxedTransport,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
            timeout,
            metrics: None,
        }
    }

    /// Record call outcomes into a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<BaselineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The breaker guarding this client
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform one logical baseline call.
    ///
    /// Network and status failures are retried; timeouts, parse failures and
    /// an open circuit are returned as they are.
    pub async fn fetch_baseline(
        &self,
        request: &BaselineRequest,
        endpoint: Endpoint,
    ) -> Result<BaselineResponse> {
        let timer = Timer::start();
        let transport = &self.transport;
        let timeout = self.timeout;

        let attempt = move || async move {
            match tokio::time::timeout(timeout, transport.fetch(endpoint, request)).await {
                Ok(result) => result,
                Err(_) => Err(BaselineError::Timeout(timeout)),
            }
        };
        let with_retry = self.retry.execute_if(attempt, BaselineError::is_retryable);

        let result = self
            .breaker
            .call(async {
                let body = transport.enqueue(Box::pin(with_retry)).await?;
                BaselineResponse::parse(&body)
            })
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open => {
                    BaselineError::CircuitOpen(self.breaker.name().to_string())
                }
                CircuitBreakerError::ServiceError(e) => e,
            });

        let elapsed = timer.stop();
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        debug!(
            %endpoint,
            outcome,
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Backend call finished"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_call(&endpoint.to_string(), outcome, elapsed);
            metrics.set_circuit_state(self.breaker.state());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeTransport;
    use crate::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig};

    const BODY: &str = r#"{"y": [10, 10, 10], "lower": [8, 8, 8], "upper": [12, 12, 12]}"#;

    fn request() -> BaselineRequest {
        BaselineRequest {
            y: vec![Some(10.0), Some(11.0), Some(9.0)],
            bs: 1,
            be: 3,
            t: 0,
            s: Some(1),
            m: Some("mean".to_string()),
            xs: None,
        }
    }

    fn client(transport: BoxedTransport, threshold: u32, timeout: Duration) -> BaselineClient {
        let breaker = Arc::new(CircuitBreaker::new(
            "backend",
            CircuitBreakerConfig::default().failure_threshold(threshold),
        ));
        let retry = RetryPolicy::new(
            RetryConfig::default()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1)),
        );
        BaselineClient::new(transport, breaker, retry, timeout)
    }

    #[tokio::test]
    async fn test_success_goes_through_queue() {
        let transport = Arc::new(FakeTransport::responding(BODY));
        let client = client(transport.clone(), 5, Duration::from_secs(1));

        let response = client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .unwrap();

        assert_eq!(response.y, vec![Some(10.0); 3]);
        assert_eq!(transport.fetches(), 1);
        assert_eq!(transport.enqueued(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(FakeTransport::scripted(vec![
            Err(BaselineError::network("connection reset")),
            Err(BaselineError::Status {
                status: 503,
                body: "busy".to_string(),
            }),
            Ok(BODY.to_string()),
        ]));
        let client = client(transport.clone(), 5, Duration::from_secs(1));

        assert!(client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .is_ok());
        assert_eq!(transport.fetches(), 3);
        assert_eq!(transport.enqueued(), 1);
        assert_eq!(client.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_one_failure() {
        let transport = Arc::new(FakeTransport::unreachable());
        let client = client(transport.clone(), 5, Duration::from_secs(1));

        let err = client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .unwrap_err();

        assert!(matches!(err, BaselineError::Network(_)));
        assert_eq!(transport.fetches(), 3);
        assert_eq!(client.breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let transport = Arc::new(FakeTransport::hanging());
        let client = client(transport.clone(), 5, Duration::from_millis(50));

        let err = client
            .fetch_baseline(&request(), Endpoint::Cumulative)
            .await
            .unwrap_err();

        assert!(matches!(err, BaselineError::Timeout(_)));
        assert_eq!(transport.fetches(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_transport() {
        let transport = Arc::new(FakeTransport::responding(BODY));
        let client = client(transport.clone(), 1, Duration::from_secs(1));
        client.breaker().record_failure();
        assert_eq!(client.breaker().state(), CircuitState::Open);

        let err = client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .unwrap_err();

        assert!(matches!(err, BaselineError::CircuitOpen(ref name) if name == "backend"));
        assert_eq!(transport.fetches(), 0);
        assert_eq!(transport.enqueued(), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_trips_breaker_without_retry() {
        let transport = Arc::new(FakeTransport::responding("<html>bad gateway</html>"));
        let client = client(transport.clone(), 1, Duration::from_secs(1));

        let err = client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .unwrap_err();

        assert!(matches!(err, BaselineError::Parse(_)));
        assert_eq!(transport.fetches(), 1);
        assert_eq!(client.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_metrics_record_outcome() {
        let metrics = Arc::new(BaselineMetrics::new().unwrap());
        let transport = Arc::new(FakeTransport::responding(BODY));
        let client =
            client(transport, 5, Duration::from_secs(1)).with_metrics(Arc::clone(&metrics));

        client
            .fetch_baseline(&request(), Endpoint::Standard)
            .await
            .unwrap();

        let text = metrics.gather_text().unwrap();
        assert!(text.contains(
            "baseline_backend_requests_total{endpoint=\"standard\",outcome=\"success\"} 1"
        ));
    }
}
