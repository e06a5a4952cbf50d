//! # Mortality Baseline
//!
//! Expected-mortality baselines and excess mortality for per-country,
//! per-age-group time series.
//!
//! ## Features
//!
//! - **Baselines**: Fit over a reference window by an external forecasting backend
//! - **Resilience**: Request queue, retries with backoff and a circuit breaker
//! - **Fallback**: Deterministic mean/stddev baseline when the backend is degraded
//! - **Excess**: Excess and prediction-interval arrays, including cumulative charts
//! - **Metrics**: Prometheus-compatible metrics export
//! - **Server**: Axum HTTP API for the server render path
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mortality_baseline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> mortality_baseline::Result<()> {
//!     let pipeline = PipelineBuilder::new()
//!         .with_base_url("https://stats.mortality.watch")
//!         .build()?;
//!
//!     let labels: Vec<String> = (2010..2024).map(|y| y.to_string()).collect();
//!     let deaths: Vec<f64> = (0..14).map(|i| 1000.0 + 10.0 * i as f64).collect();
//!
//!     let mut dataset = Dataset::new();
//!     dataset.insert(DatasetEntry::new("all", "SWE").with_metric(Metric::Deaths, &deaths));
//!
//!     let params = BaselineParams {
//!         window: BaselineWindow::new(0, 9),
//!         metric: Metric::Deaths,
//!         method: BaselineMethod::LinReg,
//!         resolution: SeriesResolution::Yearly,
//!         cumulative: false,
//!     };
//!
//!     let mut progress = |done: usize, total: usize| println!("{}/{}", done, total);
//!     pipeline
//!         .calculate_baselines(&mut dataset, &labels, &params, Some(&mut progress))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod baseline;
pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod resilience;
pub mod seasonality;
pub mod server;
pub mod types;

// Re-exports for ergonomic API
pub use backend::{
    BaselineClient, BaselineRequest, BaselineResponse, BaselineTransport, BoxedTransport,
    Endpoint, HttpTransport,
};
pub use baseline::{
    BaselineCalculator, BaselineOutcome, BaselineParams, BaselineSource, BatchOrchestrator,
    BatchSummary, FallbackReason, SkipReason,
};
pub use builder::{BaselinePipeline, PipelineBuilder};
pub use config::{PipelineConfig, WindowLimits};
pub use error::{BaselineError, Result};
pub use metrics::BaselineMetrics;
pub use resilience::{CircuitBreaker, CircuitState, RequestQueue};
pub use server::{ServerConfig, serve};
pub use types::{
    BaselineMethod, BaselineWindow, Dataset, DatasetEntry, Metric, MetricSeries,
    SeriesResolution,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::baseline::{BaselineParams, BatchSummary};
    pub use crate::builder::{BaselinePipeline, PipelineBuilder};
    pub use crate::config::PipelineConfig;
    pub use crate::error::Result;
    pub use crate::types::{
        BaselineMethod, BaselineWindow, Dataset, DatasetEntry, Metric, SeriesResolution,
    };
}
