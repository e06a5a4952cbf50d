//! Per-entry baseline computation

use super::excess::{compute_excess, ExcessAlignment};
use super::fallback;
use crate::backend::{BaselineClient, BaselineRequest, BaselineResponse, Endpoint, RequestSpec};
use crate::config::WindowLimits;
use crate::error::{BaselineError, Result};
use crate::metrics::BaselineMetrics;
use crate::seasonality::season_type;
use crate::types::{
    count_present, BaselineMethod, BaselineWindow, DatasetEntry, Metric, MetricSeries,
    SeriesResolution,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fewest present values in the window worth fitting
pub const MIN_WINDOW_POINTS: usize = 3;

/// Parameters shared by every entry of a calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineParams {
    /// Reference window
    pub window: BaselineWindow,
    /// Metric to compute
    pub metric: Metric,
    /// Fitting method
    pub method: BaselineMethod,
    /// Series resolution
    pub resolution: SeriesResolution,
    /// Whether the chart shows running totals
    #[serde(default)]
    pub cumulative: bool,
}

impl BaselineParams {
    /// Reject a window that reaches past the label sequence.
    ///
    /// An inverted window is not an argument error; it is skipped per entry.
    pub fn check_bounds(&self, label_count: usize) -> Result<()> {
        let window = self.window;
        if window.start <= window.end && window.end >= label_count {
            return Err(BaselineError::invalid_input(format!(
                "window {} outside of {} labels",
                window, label_count
            )));
        }
        Ok(())
    }
}

/// Why an entry was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Entry does not carry the metric
    MissingMetric,
    /// `start > end`
    InvalidWindow,
    /// Too few present values inside the window
    InsufficientData,
}

impl SkipReason {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingMetric => "missing_metric",
            SkipReason::InvalidWindow => "invalid_window",
            SkipReason::InsufficientData => "insufficient_data",
        }
    }
}

/// Why the local estimator was used instead of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Window longer than the resolution limit; backend not called
    OversizedWindow,
    /// A backend attempt timed out
    Timeout,
    /// Network or status failures outlasted the retries
    BackendFailure,
    /// Circuit breaker rejected the call
    CircuitOpen,
    /// Backend answer could not be decoded
    MalformedResponse,
    /// Request queue shut down
    QueueClosed,
}

impl FallbackReason {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::OversizedWindow => "oversized_window",
            FallbackReason::Timeout => "timeout",
            FallbackReason::BackendFailure => "backend_failure",
            FallbackReason::CircuitOpen => "circuit_open",
            FallbackReason::MalformedResponse => "malformed_response",
            FallbackReason::QueueClosed => "queue_closed",
        }
    }
}

impl From<&BaselineError> for FallbackReason {
    fn from(err: &BaselineError) -> Self {
        match err {
            BaselineError::Timeout(_) => FallbackReason::Timeout,
            BaselineError::CircuitOpen(_) => FallbackReason::CircuitOpen,
            BaselineError::Parse(_) => FallbackReason::MalformedResponse,
            BaselineError::QueueClosed => FallbackReason::QueueClosed,
            _ => FallbackReason::BackendFailure,
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a computed baseline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum BaselineSource {
    /// Forecasting backend
    Backend,
    /// Local mean/stddev estimator
    Fallback(FallbackReason),
}

impl BaselineSource {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineSource::Backend => "backend",
            BaselineSource::Fallback(_) => "fallback",
        }
    }
}

/// Terminal state of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineOutcome {
    /// `auto` method: nothing computed
    NotRequested,
    /// Validation skip: arrays untouched
    Skipped(SkipReason),
    /// Baseline and excess arrays written
    Computed {
        /// Origin of the baseline
        source: BaselineSource,
    },
}

/// Computes baseline and excess arrays for single entries
pub struct BaselineCalculator {
    client: BaselineClient,
    limits: WindowLimits,
    decimals: u32,
    metrics: Option<Arc<BaselineMetrics>>,
}

impl BaselineCalculator {
    /// Create a new calculator
    pub fn new(client: BaselineClient, limits: WindowLimits, decimals: u32) -> Self {
        Self {
            client,
            limits,
            decimals,
            metrics: None,
        }
    }

    /// Record outcomes into a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<BaselineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The backend client
    pub fn client(&self) -> &BaselineClient {
        &self.client
    }

    /// Window limits in force
    pub fn limits(&self) -> &WindowLimits {
        &self.limits
    }

    /// Compute the baseline of `params.metric` for one entry, in place.
    ///
    /// Backend failures degrade to the local estimator; only malformed
    /// arguments are returned as errors.
    pub async fn calculate(
        &self,
        entry: &mut DatasetEntry,
        labels: &[String],
        params: &BaselineParams,
    ) -> Result<BaselineOutcome> {
        if params.method == BaselineMethod::Auto {
            return Ok(BaselineOutcome::NotRequested);
        }

        entry.validate(labels.len())?;
        params.check_bounds(labels.len())?;

        let DatasetEntry {
            age_group,
            iso3c,
            metrics,
        } = entry;
        let window = params.window;

        let Some(series) = metrics.get_mut(&params.metric) else {
            return Ok(self.skip(age_group, iso3c, params, SkipReason::MissingMetric));
        };

        if window.start > window.end {
            return Ok(self.skip(age_group, iso3c, params, SkipReason::InvalidWindow));
        }

        if count_present(&series.primary, window) < MIN_WINDOW_POINTS {
            return Ok(self.skip(age_group, iso3c, params, SkipReason::InsufficientData));
        }

        let source = if self.limits.is_oversized(params.resolution, window) {
            self.fallback(series, age_group, iso3c, params, FallbackReason::OversizedWindow)
        } else {
            let endpoint = Endpoint::select(params.cumulative, season_type(params.resolution));
            let request = BaselineRequest::build(RequestSpec {
                values: &series.primary,
                window,
                method: params.method,
                resolution: params.resolution,
                first_label: labels.first().map(String::as_str),
                endpoint,
                decimals: self.decimals,
            });

            match self.client.fetch_baseline(&request, endpoint).await {
                Ok(response) => {
                    write_response(series, response, params.method, window);
                    let alignment = match endpoint {
                        Endpoint::Cumulative => ExcessAlignment::Cumulative { from: window.start },
                        Endpoint::Standard => ExcessAlignment::Standard,
                    };
                    compute_excess(series, alignment);
                    BaselineSource::Backend
                }
                Err(e) => {
                    warn!(
                        %age_group,
                        %iso3c,
                        metric = %params.metric,
                        error = %e,
                        "Backend baseline failed, using fallback"
                    );
                    self.fallback(series, age_group, iso3c, params, FallbackReason::from(&e))
                }
            }
        };

        if let Some(m) = &self.metrics {
            m.record_computed(source.as_str());
        }
        Ok(BaselineOutcome::Computed { source })
    }

    fn skip(
        &self,
        age_group: &str,
        iso3c: &str,
        params: &BaselineParams,
        reason: SkipReason,
    ) -> BaselineOutcome {
        warn!(
            %age_group,
            %iso3c,
            metric = %params.metric,
            window = %params.window,
            reason = reason.as_str(),
            "Skipping baseline"
        );
        if let Some(m) = &self.metrics {
            m.record_skip(reason.as_str());
        }
        BaselineOutcome::Skipped(reason)
    }

    fn fallback(
        &self,
        series: &mut MetricSeries,
        age_group: &str,
        iso3c: &str,
        params: &BaselineParams,
        reason: FallbackReason,
    ) -> BaselineSource {
        match fallback::apply(series, params.window) {
            Some(estimate) => debug!(
                %age_group,
                %iso3c,
                %reason,
                mean = estimate.mean,
                std_dev = estimate.std_dev,
                "Fallback baseline"
            ),
            None => warn!(%age_group, %iso3c, %reason, "Fallback had no data"),
        }
        compute_excess(series, ExcessAlignment::Standard);

        if let Some(m) = &self.metrics {
            m.record_fallback(reason.as_str());
        }
        BaselineSource::Fallback(reason)
    }
}

/// Write a backend response into the baseline arrays
fn write_response(
    series: &mut MetricSeries,
    response: BaselineResponse,
    method: BaselineMethod,
    window: BaselineWindow,
) {
    let len = series.len();
    let mut response = response.fit_to(len);

    if method == BaselineMethod::Naive {
        flatten_naive(&mut response.y, window.end);
    }

    series.baseline = response.y;
    series.baseline_lower = response.lower;
    series.baseline_upper = response.upper;
    series.zscore = response.zscore.unwrap_or_else(|| vec![None; len]);
}

/// Overwrite every present value with the value at `end`; no-op when that
/// value is missing
fn flatten_naive(baseline: &mut [Option<f64>], end: usize) {
    let Some(at_end) = baseline.get(end).copied().flatten() else {
        return;
    };
    for value in baseline.iter_mut().filter(|v| v.is_some()) {
        *value = Some(at_end);
    }
}
