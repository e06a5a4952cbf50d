//! Local mean/stddev baseline used when the backend cannot be used

use crate::types::{BaselineWindow, MetricSeries, Series};

/// Width of the fallback prediction interval in standard deviations
pub const INTERVAL_WIDTH: f64 = 2.0;

/// Result of the fallback estimator
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackBaseline {
    /// Mean of the present values in the window
    pub mean: f64,
    /// Population standard deviation of the same values
    pub std_dev: f64,
    /// Constant baseline over the full length
    pub baseline: Series,
    /// `mean - 2σ` after the window, missing elsewhere
    pub lower: Series,
    /// `mean + 2σ` after the window, missing elsewhere
    pub upper: Series,
}

/// Estimate a flat baseline from the values inside `window`.
///
/// Returns `None` when the window holds no present value.
pub fn estimate(values: &[Option<f64>], window: BaselineWindow) -> Option<FallbackBaseline> {
    let end = window.end.min(values.len().saturating_sub(1));
    let present: Vec<f64> = values
        .get(window.start..=end)
        .unwrap_or_default()
        .iter()
        .flatten()
        .copied()
        .collect();

    if present.is_empty() {
        return None;
    }

    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let len = values.len();
    let interval = |bound: f64| -> Series {
        (0..len)
            .map(|i| (i > window.end).then_some(bound))
            .collect()
    };

    Some(FallbackBaseline {
        mean,
        std_dev,
        baseline: vec![Some(mean); len],
        lower: interval(mean - INTERVAL_WIDTH * std_dev),
        upper: interval(mean + INTERVAL_WIDTH * std_dev),
    })
}

/// Estimate from `series.primary` and write the baseline arrays.
///
/// When nothing can be estimated the series is left untouched. A stale
/// z-score from an earlier backend fit is cleared.
pub fn apply(series: &mut MetricSeries, window: BaselineWindow) -> Option<FallbackBaseline> {
    let fallback = estimate(&series.primary, window)?;
    series.baseline = fallback.baseline.clone();
    series.baseline_lower = fallback.lower.clone();
    series.baseline_upper = fallback.upper.clone();
    series.zscore = vec![None; series.len()];
    Some(fallback)
}
