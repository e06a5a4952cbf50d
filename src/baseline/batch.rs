//! Dataset-wide fan-out of the calculator

use super::calculator::{BaselineCalculator, BaselineOutcome, BaselineParams, BaselineSource};
use crate::error::Result;
use crate::metrics::BaselineMetrics;
use crate::types::{validate_labels, BaselineMethod, Dataset};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Progress callback receiving `(completed, total)`
pub type ProgressFn<'a> = &'a mut (dyn FnMut(usize, usize) + Send);

/// Per-outcome entry counts of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Entries in the dataset
    pub total: usize,
    /// Baselines fitted by the backend
    pub backend: usize,
    /// Baselines from the local estimator
    pub fallback: usize,
    /// Entries left untouched by validation
    pub skipped: usize,
    /// Entries not computed because the method is `auto`
    pub not_requested: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: BaselineOutcome) {
        match outcome {
            BaselineOutcome::NotRequested => self.not_requested += 1,
            BaselineOutcome::Skipped(_) => self.skipped += 1,
            BaselineOutcome::Computed {
                source: BaselineSource::Backend,
            } => self.backend += 1,
            BaselineOutcome::Computed {
                source: BaselineSource::Fallback(_),
            } => self.fallback += 1,
        }
    }

    /// Entries that completed, whatever their outcome
    pub fn completed(&self) -> usize {
        self.backend + self.fallback + self.skipped + self.not_requested
    }
}

/// Runs the calculator over every entry of a dataset
pub struct BatchOrchestrator {
    calculator: Arc<BaselineCalculator>,
    metrics: Option<Arc<BaselineMetrics>>,
}

impl BatchOrchestrator {
    /// Create a new orchestrator
    pub fn new(calculator: Arc<BaselineCalculator>) -> Self {
        Self {
            calculator,
            metrics: None,
        }
    }

    /// Count completed batches in a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<BaselineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The per-entry calculator
    pub fn calculator(&self) -> &Arc<BaselineCalculator> {
        &self.calculator
    }

    /// Compute baselines for every entry of `dataset`, in place.
    ///
    /// Entries run concurrently; the request queue bounds how many reach
    /// the backend at once. `progress` is called with `(0, total)` first
    /// and then once per finished entry.
    pub async fn calculate_baselines(
        &self,
        dataset: &mut Dataset,
        labels: &[String],
        params: &BaselineParams,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<BatchSummary> {
        validate_labels(labels)?;
        dataset.validate(labels.len())?;
        if params.method != BaselineMethod::Auto {
            params.check_bounds(labels.len())?;
        }

        let mut summary = BatchSummary {
            total: dataset.len(),
            ..BatchSummary::default()
        };
        if let Some(report) = progress.as_deref_mut() {
            report(0, summary.total);
        }

        let calculator = &self.calculator;
        let mut pending: FuturesUnordered<_> = dataset
            .entries_mut()
            .map(|entry| calculator.calculate(entry, labels, params))
            .collect();

        while let Some(result) = pending.next().await {
            summary.record(result?);
            if let Some(report) = progress.as_deref_mut() {
                report(summary.completed(), summary.total);
            }
        }

        info!(
            metric = %params.metric,
            method = %params.method,
            total = summary.total,
            backend = summary.backend,
            fallback = summary.fallback,
            skipped = summary.skipped,
            "Batch completed"
        );
        if let Some(m) = &self.metrics {
            m.record_batch();
        }

        Ok(summary)
    }
}
