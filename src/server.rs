//! HTTP surface of the pipeline
//!
//! ## Table of Contents
//! - **ServerConfig**: Bind address and request limits
//! - **router**: Axum router with the baseline API, health and metrics
//! - **serve**: Run the server until Ctrl-C

use crate::baseline::{BaselineParams, BatchSummary};
use crate::builder::BaselinePipeline;
use crate::error::{BaselineError, Result};
use crate::types::{BaselineMethod, BaselineWindow, Dataset, Metric, SeriesResolution};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Environment variable overriding the bind address
pub const BIND_ADDR_ENV: &str = "BASELINE_BIND_ADDR";

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_addr: SocketAddr,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Create with custom bind address
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse from string address
    pub fn with_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| BaselineError::config(format!("Invalid address: {}", e)))?;
        Ok(self)
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<BaselinePipeline>,
    started: Instant,
}

/// Body of `POST /api/v1/baselines`
#[derive(Debug, Deserialize)]
pub struct BaselineApiRequest {
    /// Entries to compute, keyed by age group then country
    pub dataset: Dataset,
    /// Shared label sequence
    pub labels: Vec<String>,
    /// Window start; negative values skip the computation
    pub start: i64,
    /// Window end; negative values skip the computation
    pub end: i64,
    /// Metric to compute
    pub metric: Metric,
    /// Fitting method
    pub method: BaselineMethod,
    /// Series resolution
    pub resolution: SeriesResolution,
    /// Running-total chart
    #[serde(default)]
    pub cumulative: bool,
    /// Shrink the window to the resolution limit instead of falling back
    #[serde(default)]
    pub clamp_window: bool,
}

/// Response of `POST /api/v1/baselines`
#[derive(Debug, Serialize)]
pub struct BaselineApiResponse {
    /// The dataset with baseline and excess arrays filled in
    pub dataset: Dataset,
    /// Per-outcome counts
    pub summary: BatchSummary,
    /// Window actually used, if any
    pub window: Option<BaselineWindow>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since the router was built
    pub uptime_secs: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// HTTP status code
    pub code: u16,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<BaselineError> for ErrorResponse {
    fn from(err: BaselineError) -> Self {
        let status = match err {
            BaselineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            error: err.to_string(),
            code: status.as_u16(),
        }
    }
}

/// Build the HTTP router
pub fn router(pipeline: Arc<BaselinePipeline>, config: &ServerConfig) -> Router {
    let state = AppState {
        pipeline,
        started: Instant::now(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/baselines", post(baselines_handler))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(pipeline: Arc<BaselinePipeline>, config: ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| BaselineError::network(format!("Failed to bind: {}", e)))?;

    info!(addr = %config.bind_addr, "HTTP server starting");

    axum::serve(listener, router(pipeline, &config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BaselineError::network(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// HTTP handlers

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn ready_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue = state.pipeline.queue();
    Json(serde_json::json!({
        "status": "ready",
        "circuit": state.pipeline.breaker().state().as_str(),
        "in_flight": queue.map(|q| q.in_flight()),
        "waiting": queue.map(|q| q.waiting()),
    }))
}

async fn metrics_handler(
    State(state): State<AppState>,
) -> std::result::Result<String, StatusCode> {
    if state.pipeline.metrics().is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    state
        .pipeline
        .gather_metrics()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn baselines_handler(
    State(state): State<AppState>,
    Json(request): Json<BaselineApiRequest>,
) -> std::result::Result<Json<BaselineApiResponse>, ErrorResponse> {
    let BaselineApiRequest {
        mut dataset,
        labels,
        start,
        end,
        metric,
        method,
        resolution,
        cumulative,
        clamp_window,
    } = request;

    let Some(mut window) = BaselineWindow::try_new(start, end) else {
        warn!(start, end, %metric, "Negative window bounds, skipping baseline");
        let total = dataset.len();
        let summary = if method == BaselineMethod::Auto {
            BatchSummary {
                total,
                not_requested: total,
                ..BatchSummary::default()
            }
        } else {
            BatchSummary {
                total,
                skipped: total,
                ..BatchSummary::default()
            }
        };
        return Ok(Json(BaselineApiResponse {
            dataset,
            summary,
            window: None,
        }));
    };

    if clamp_window {
        let clamped = state.pipeline.limits().clamp(resolution, window);
        if clamped != window {
            info!(requested = %window, clamped = %clamped, %resolution, "Clamped baseline window");
        }
        window = clamped;
    }

    let params = BaselineParams {
        window,
        metric,
        method,
        resolution,
        cumulative,
    };
    let summary = state
        .pipeline
        .calculate_baselines(&mut dataset, &labels, &params, None)
        .await?;

    Ok(Json(BaselineApiResponse {
        dataset,
        summary,
        window: Some(window),
    }))
}
