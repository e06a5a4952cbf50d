//! PipelineBuilder for configuring and constructing baseline pipelines
//!
//! ## Table of Contents
//! - **PipelineBuilder**: Builder pattern for pipeline configuration
//! - **BaselinePipeline**: Assembled queue, breaker, client, calculator and orchestrator

use crate::backend::{BaselineClient, BoxedTransport, HttpTransport};
use crate::baseline::{
    BaselineCalculator, BaselineParams, BatchOrchestrator, BatchSummary, ProgressFn,
};
use crate::config::{BreakerSettings, PipelineConfig, RetrySettings, WindowLimits};
use crate::error::{BaselineError, Result};
use crate::metrics::BaselineMetrics;
use crate::resilience::{CircuitBreaker, QueueConfig, RequestQueue, RetryPolicy};
use crate::types::Dataset;
use std::sync::Arc;
use tracing::info;

/// Name of the breaker guarding the forecasting backend
pub const BACKEND_BREAKER: &str = "forecast-backend";

/// A fully wired baseline pipeline.
///
/// The breaker is created once here and shared by every calculation run
/// through this pipeline. The queue is the one the transport admits through.
pub struct BaselinePipeline {
    config: PipelineConfig,
    queue: Option<Arc<RequestQueue>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Option<Arc<BaselineMetrics>>,
    orchestrator: BatchOrchestrator,
}

impl BaselinePipeline {
    /// Configuration the pipeline was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Admission queue of the transport, when it has one
    pub fn queue(&self) -> Option<&Arc<RequestQueue>> {
        self.queue.as_ref()
    }

    /// Circuit breaker shared by all backend calls
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Metrics registry, when enabled
    pub fn metrics(&self) -> Option<&Arc<BaselineMetrics>> {
        self.metrics.as_ref()
    }

    /// Per-entry calculator
    pub fn calculator(&self) -> &BaselineCalculator {
        self.orchestrator.calculator()
    }

    /// Dataset orchestrator
    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    /// Window limits in force
    pub fn limits(&self) -> &WindowLimits {
        &self.config.limits
    }

    /// Compute baselines for a whole dataset
    pub async fn calculate_baselines(
        &self,
        dataset: &mut Dataset,
        labels: &[String],
        params: &BaselineParams,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<BatchSummary> {
        self.orchestrator
            .calculate_baselines(dataset, labels, params, progress)
            .await
    }

    /// Refresh gauges and render metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let metrics = self
            .metrics
            .as_ref()
            .ok_or_else(|| BaselineError::metrics("metrics are disabled"))?;
        if let Some(queue) = &self.queue {
            metrics.set_queue(queue.in_flight(), queue.waiting());
        }
        metrics.set_circuit_state(self.breaker.state());
        metrics.gather_text()
    }
}

/// Builder for constructing baseline pipelines
pub struct PipelineBuilder {
    config: PipelineConfig,
    transport: Option<BoxedTransport>,
}

impl PipelineBuilder {
    /// Create a new PipelineBuilder with default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            transport: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the backend base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend.base_url = url.into();
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.backend.timeout_ms = timeout_ms;
        self
    }

    /// Set the concurrency limit of the request queue
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.config.queue.max_concurrent = max;
        self
    }

    /// Set retry tuning
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set circuit breaker tuning
    pub fn with_breaker(mut self, breaker: BreakerSettings) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// Set window limits
    pub fn with_limits(mut self, limits: WindowLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Enable or disable metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    /// Use a custom transport instead of HTTP.
    ///
    /// The transport is responsible for its own admission control.
    pub fn with_transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<BaselinePipeline> {
        self.config.validate()?;
        info!(
            backend = %self.config.backend.base_url,
            max_concurrent = self.config.queue.max_concurrent,
            max_retries = self.config.retry.max_retries,
            "Building baseline pipeline"
        );

        let transport = match self.transport {
            Some(t) => t,
            None => {
                let queue = Arc::new(RequestQueue::new(QueueConfig::from(&self.config.queue)));
                Arc::new(HttpTransport::new(self.config.backend.clone(), queue)?) as BoxedTransport
            }
        };
        let queue = transport.admission_queue().cloned();

        let breaker = Arc::new(CircuitBreaker::new(
            BACKEND_BREAKER,
            (&self.config.breaker).into(),
        ));

        let metrics = if self.config.metrics_enabled {
            Some(Arc::new(BaselineMetrics::new()?))
        } else {
            None
        };

        let mut client = BaselineClient::new(
            transport,
            Arc::clone(&breaker),
            RetryPolicy::new((&self.config.retry).into()),
            self.config.backend.timeout(),
        );
        if let Some(m) = &metrics {
            client = client.with_metrics(Arc::clone(m));
        }
        let mut calculator = BaselineCalculator::new(
            client,
            self.config.limits.clone(),
            self.config.backend.request_decimals,
        );
        if let Some(m) = &metrics {
            calculator = calculator.with_metrics(Arc::clone(m));
        }
        let mut orchestrator = BatchOrchestrator::new(Arc::new(calculator));
        if let Some(m) = &metrics {
            orchestrator = orchestrator.with_metrics(Arc::clone(m));
        }

        Ok(BaselinePipeline {
            config: self.config,
            queue,
            breaker,
            metrics,
            orchestrator,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
