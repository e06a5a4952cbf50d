//! Excess derivation
//!
//! Missing values propagate: a difference is only present when both of its
//! operands are present.

use crate::types::{MetricSeries, Series};

/// How observed values line up with the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExcessAlignment {
    /// Baseline is directly comparable to observed values
    #[default]
    Standard,
    /// Baseline is a running total starting at `from`; observed values are
    /// accumulated the same way before subtracting
    Cumulative {
        /// First position of the running total
        from: usize,
    },
}

/// Running total starting at `from`.
///
/// Positions before `from` are missing. A missing value adds nothing but
/// does not reset the carried total.
pub fn cumulative_sum_from(values: &[Option<f64>], from: usize) -> Series {
    let mut total = 0.0;
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if i < from {
                return None;
            }
            total += value.unwrap_or(0.0);
            Some(total)
        })
        .collect()
}

fn difference(observed: &[Option<f64>], reference: &[Option<f64>]) -> Series {
    observed
        .iter()
        .zip(reference)
        .map(|(o, r)| match (o, r) {
            (Some(o), Some(r)) => Some(o - r),
            _ => None,
        })
        .collect()
}

/// Fill `excess`, `excess_lower` and `excess_upper` from the primary and
/// baseline arrays
pub fn compute_excess(series: &mut MetricSeries, alignment: ExcessAlignment) {
    let cumulated;
    let observed: &[Option<f64>] = match alignment {
        ExcessAlignment::Standard => &series.primary,
        ExcessAlignment::Cumulative { from } => {
            cumulated = cumulative_sum_from(&series.primary, from);
            &cumulated
        }
    };

    let excess = difference(observed, &series.baseline);
    let excess_lower = difference(observed, &series.baseline_lower);
    let excess_upper = difference(observed, &series.baseline_upper);

    series.excess = excess;
    series.excess_lower = excess_lower;
    series.excess_upper = excess_upper;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Series {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_cumulative_sum_from() {
        let values = some(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            cumulative_sum_from(&values, 2),
            vec![None, None, Some(3.0), Some(7.0), Some(12.0)]
        );
    }

    #[test]
    fn test_cumulative_sum_carries_over_missing() {
        let values = vec![Some(1.0), None, Some(2.0), Some(3.0)];
        assert_eq!(
            cumulative_sum_from(&values, 0),
            vec![Some(1.0), Some(1.0), Some(3.0), Some(6.0)]
        );
        assert_eq!(cumulative_sum_from(&values, 9), vec![None; 4]);
    }

    #[test]
    fn test_end_to_end_excess() {
        let mut series = MetricSeries::new(some(&[100.0, 110.0, 120.0]));
        series.baseline = some(&[100.0, 100.0, 100.0]);
        series.baseline_lower = some(&[95.0, 95.0, 95.0]);
        series.baseline_upper = some(&[105.0, 105.0, 105.0]);

        compute_excess(&mut series, ExcessAlignment::Standard);

        assert_eq!(series.excess, some(&[0.0, 10.0, 20.0]));
        assert_eq!(series.excess_lower, some(&[5.0, 15.0, 25.0]));
        assert_eq!(series.excess_upper, some(&[-5.0, 5.0, 15.0]));
    }

    #[test]
    fn test_missing_propagates() {
        let mut series = MetricSeries::new(vec![Some(10.0), None, Some(30.0), Some(40.0)]);
        series.baseline = vec![Some(8.0), Some(8.0), None, Some(8.0)];
        series.baseline_lower = vec![None, None, None, Some(6.0)];

        compute_excess(&mut series, ExcessAlignment::Standard);

        for i in 0..4 {
            let expected_missing = series.primary[i].is_none() || series.baseline[i].is_none();
            assert_eq!(series.excess[i].is_none(), expected_missing);
        }
        assert_eq!(series.excess, vec![Some(2.0), None, None, Some(32.0)]);
        assert_eq!(series.excess_lower, vec![None, None, None, Some(34.0)]);
        assert_eq!(series.excess_upper, vec![None; 4]);
    }

    #[test]
    fn test_cumulative_alignment() {
        let mut series = MetricSeries::new(some(&[5.0, 10.0, 10.0, 10.0]));
        series.baseline = vec![None, Some(9.0), Some(18.0), Some(27.0)];

        compute_excess(&mut series, ExcessAlignment::Cumulative { from: 1 });

        assert_eq!(series.excess, vec![None, Some(1.0), Some(2.0), Some(3.0)]);
    }
}
