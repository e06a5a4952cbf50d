//! Metrics and monitoring for the baseline pipeline
//!
//! ## Table of Contents
//! - **BaselineMetrics**: Prometheus registry with backend, fallback and queue metrics
//! - **Timer**: Small helper measuring elapsed seconds

use crate::error::{BaselineError, Result};
use crate::resilience::CircuitState;
use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
};

/// Core metrics for the baseline pipeline
pub struct BaselineMetrics {
    registry: Registry,

    // Backend metrics
    pub backend_requests: CounterVec,
    pub backend_latency: HistogramVec,
    pub circuit_state: IntGauge,

    // Queue metrics
    pub queue_in_flight: Gauge,
    pub queue_waiting: Gauge,

    // Entry outcome metrics
    pub baselines_computed: CounterVec,
    pub fallbacks: CounterVec,
    pub skips: CounterVec,
    pub batches: Counter,
}

impl BaselineMetrics {
    /// Create a new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let backend_requests = CounterVec::new(
            Opts::new("baseline_backend_requests_total", "Backend calls by outcome"),
            &["endpoint", "outcome"],
        )?;
        let backend_latency = HistogramVec::new(
            HistogramOpts::new(
                "baseline_backend_latency_seconds",
                "Backend call latency including queueing and retries",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["endpoint"],
        )?;
        let circuit_state = IntGauge::new(
            "baseline_circuit_state",
            "Circuit breaker state (0 closed, 1 open, 2 half-open)",
        )?;

        let queue_in_flight =
            Gauge::new("baseline_queue_in_flight", "Backend calls currently running")?;
        let queue_waiting =
            Gauge::new("baseline_queue_waiting", "Backend calls waiting for a slot")?;

        let baselines_computed = CounterVec::new(
            Opts::new("baseline_entries_computed_total", "Entries with a baseline"),
            &["source"],
        )?;
        let fallbacks = CounterVec::new(
            Opts::new("baseline_fallbacks_total", "Fallback estimator invocations"),
            &["reason"],
        )?;
        let skips = CounterVec::new(
            Opts::new("baseline_skips_total", "Entries skipped by validation"),
            &["reason"],
        )?;
        let batches = Counter::new("baseline_batches_total", "Completed batches")?;

        registry.register(Box::new(backend_requests.clone()))?;
        registry.register(Box::new(backend_latency.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(queue_in_flight.clone()))?;
        registry.register(Box::new(queue_waiting.clone()))?;
        registry.register(Box::new(baselines_computed.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(skips.clone()))?;
        registry.register(Box::new(batches.clone()))?;

        Ok(Self {
            registry,
            backend_requests,
            backend_latency,
            circuit_state,
            queue_in_flight,
            queue_waiting,
            baselines_computed,
            fallbacks,
            skips,
            batches,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished backend call
    pub fn record_backend_call(&self, endpoint: &str, outcome: &str, latency_secs: f64) {
        self.backend_requests
            .with_label_values(&[endpoint, outcome])
            .inc();
        self.backend_latency
            .with_label_values(&[endpoint])
            .observe(latency_secs);
    }

    /// Publish the circuit breaker state
    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit_state.set(state as i64);
    }

    /// Publish queue occupancy
    pub fn set_queue(&self, in_flight: usize, waiting: usize) {
        self.queue_in_flight.set(in_flight as f64);
        self.queue_waiting.set(waiting as f64);
    }

    /// Record an entry whose baseline came from `source`
    pub fn record_computed(&self, source: &str) {
        self.baselines_computed.with_label_values(&[source]).inc();
    }

    /// Record a fallback
    pub fn record_fallback(&self, reason: &str) {
        self.fallbacks.with_label_values(&[reason]).inc();
    }

    /// Record a validation skip
    pub fn record_skip(&self, reason: &str) {
        self.skips.with_label_values(&[reason]).inc();
    }

    /// Record a completed batch
    pub fn record_batch(&self) {
        self.batches.inc();
    }

    /// Gather all metrics as text
    pub fn gather_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| BaselineError::metrics(format!("Encode error: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| BaselineError::metrics(format!("UTF8 error: {}", e)))
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Stop and return elapsed seconds
    pub fn stop(self) -> f64 {
        self.elapsed_secs()
    }
}
