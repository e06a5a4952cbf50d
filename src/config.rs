//! Pipeline configuration
//!
//! ## Table of Contents
//! - **PipelineConfig**: Complete, serde-loadable configuration
//! - **BackendConfig**: Forecasting backend endpoint and request shaping
//! - **RetrySettings / BreakerSettings / QueueSettings**: Resilience tuning
//! - **WindowLimits**: Maximum baseline window per resolution family

use crate::error::{BaselineError, Result};
use crate::resilience::{BackoffStrategy, CircuitBreakerConfig, QueueConfig, RetryConfig};
use crate::types::{BaselineWindow, ResolutionFamily, SeriesResolution};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable overriding the backend base URL
pub const BASELINE_API_ENV: &str = "BASELINE_API_URL";

/// Environment variable overriding the per-attempt timeout (milliseconds)
pub const BASELINE_TIMEOUT_ENV: &str = "BASELINE_TIMEOUT_MS";

/// Environment variable overriding the concurrency limit
pub const BASELINE_MAX_CONCURRENT_ENV: &str = "BASELINE_MAX_CONCURRENT";

/// Environment variable overriding the retry count
pub const BASELINE_MAX_RETRIES_ENV: &str = "BASELINE_MAX_RETRIES";

/// Most decimal places `request_decimals` may ask for
pub const MAX_REQUEST_DECIMALS: u32 = 15;

/// Forecasting backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; the cumulative variant lives at `{base_url}/cum`
    pub base_url: String,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Longest URL sent as GET; larger payloads are POSTed as JSON
    pub max_get_url_len: usize,
    /// Decimal places kept when sending values
    pub request_decimals: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stats.mortality.watch".to_string(),
            timeout_ms: 10_000,
            max_get_url_len: 2_000,
            request_decimals: 2,
        }
    }
}

impl BackendConfig {
    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Delay ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Delay growth
    pub strategy: BackoffStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            strategy: BackoffStrategy::Linear,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig::new()
            .max_retries(settings.max_retries)
            .initial_delay(Duration::from_millis(settings.base_delay_ms))
            .max_delay(Duration::from_millis(settings.max_delay_ms))
            .strategy(settings.strategy)
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Recent failures that open the circuit
    pub failure_threshold: u32,
    /// Window in which failures accumulate (seconds)
    pub failure_window_secs: u64,
    /// Cooldown before a trial call (seconds)
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            reset_timeout_secs: 30,
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        CircuitBreakerConfig::new()
            .failure_threshold(settings.failure_threshold)
            .failure_window(Duration::from_secs(settings.failure_window_secs))
            .reset_timeout(Duration::from_secs(settings.reset_timeout_secs))
            .half_open_max_requests(1)
    }
}

/// Request queue tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Concurrent backend calls
    pub max_concurrent: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        QueueConfig::new().max_concurrent(settings.max_concurrent)
    }
}

/// Maximum baseline window length, in labels, per resolution family.
///
/// Larger windows skip the backend (they would time out) and use the local
/// fallback estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowLimits {
    /// Weekly family (10 years)
    pub weekly: usize,
    /// Monthly (10 years)
    pub monthly: usize,
    /// Quarterly (10 years)
    pub quarterly: usize,
    /// Yearly, flu season, mid-year
    pub yearly: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            weekly: 520,
            monthly: 120,
            quarterly: 40,
            yearly: 30,
        }
    }
}

impl WindowLimits {
    /// Maximum window length for a resolution
    pub fn max_window(&self, resolution: SeriesResolution) -> usize {
        match resolution.family() {
            ResolutionFamily::Weekly => self.weekly,
            ResolutionFamily::Monthly => self.monthly,
            ResolutionFamily::Quarterly => self.quarterly,
            ResolutionFamily::Yearly => self.yearly,
        }
    }

    /// Whether the window exceeds the resolution maximum
    pub fn is_oversized(&self, resolution: SeriesResolution, window: BaselineWindow) -> bool {
        window.len() > self.max_window(resolution)
    }

    /// Shrink the window to the resolution maximum, keeping its start
    pub fn clamp(&self, resolution: SeriesResolution, window: BaselineWindow) -> BaselineWindow {
        window.clamp_to(self.max_window(resolution))
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Backend endpoint settings
    pub backend: BackendConfig,
    /// Retry tuning
    pub retry: RetrySettings,
    /// Circuit breaker tuning
    pub breaker: BreakerSettings,
    /// Request queue tuning
    pub queue: QueueSettings,
    /// Window limits
    pub limits: WindowLimits,
    /// Register prometheus metrics
    pub metrics_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            queue: QueueSettings::default(),
            limits: WindowLimits::default(),
            metrics_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            BaselineError::config(format!("invalid config {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded pipeline configuration");
        config.validate()?;
        Ok(config)
    }

    /// Apply `BASELINE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(BASELINE_API_ENV) {
            self.backend.base_url = url;
        }
        if let Some(timeout) = parse_env::<u64>(BASELINE_TIMEOUT_ENV)? {
            self.backend.timeout_ms = timeout;
        }
        if let Some(max) = parse_env::<usize>(BASELINE_MAX_CONCURRENT_ENV)? {
            self.queue.max_concurrent = max;
        }
        if let Some(retries) = parse_env::<u32>(BASELINE_MAX_RETRIES_ENV)? {
            self.retry.max_retries = retries;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(BaselineError::config("backend.base_url must not be empty"));
        }
        if self.backend.timeout_ms == 0 {
            return Err(BaselineError::config("backend.timeout_ms must be positive"));
        }
        if self.backend.request_decimals > MAX_REQUEST_DECIMALS {
            return Err(BaselineError::config(format!(
                "backend.request_decimals must be at most {}",
                MAX_REQUEST_DECIMALS
            )));
        }
        if self.queue.max_concurrent == 0 {
            return Err(BaselineError::config("queue.max_concurrent must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(BaselineError::config(
                "breaker.failure_threshold must be at least 1",
            ));
        }
        let limits = &self.limits;
        if [limits.weekly, limits.monthly, limits.quarterly, limits.yearly].contains(&0) {
            return Err(BaselineError::config("window limits must be positive"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BaselineError::config(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
