//! Baseline and excess computation
//!
//! ## Table of Contents
//! - **BaselineCalculator**: Per-entry flow (validate, backend or fallback, excess)
//! - **BatchOrchestrator**: Concurrent fan-out over a dataset with progress
//! - **fallback**: Local mean/stddev estimator
//! - **excess**: Excess arrays and cumulative alignment

pub mod batch;
pub mod calculator;
pub mod excess;
pub mod fallback;

pub use batch::{BatchOrchestrator, BatchSummary, ProgressFn};
pub use calculator::{
    BaselineCalculator, BaselineOutcome, BaselineParams, BaselineSource, FallbackReason,
    SkipReason, MIN_WINDOW_POINTS,
};
pub use excess::{compute_excess, cumulative_sum_from, ExcessAlignment};
pub use fallback::FallbackBaseline;
