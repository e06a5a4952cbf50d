//! Forecasting backend integration
//!
//! ## Table of Contents
//! - **Endpoint**: Standard vs cumulative backend route
//! - **BaselineRequest**: Externalized request payload
//! - **BaselineResponse**: Decoded backend response
//! - **BaselineTransport**: The two capabilities the pipeline needs from the
//!   outside world (fetch, enqueue)
//! - **HttpTransport**: Production transport over reqwest
//! - **BaselineClient**: Timeout, retry and circuit breaking around a transport

pub mod client;
pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use client::BaselineClient;
pub use http::HttpTransport;

use crate::error::{BaselineError, Result};
use crate::resilience::RequestQueue;
use crate::seasonality::{label_to_xs_param, season_type};
use crate::types::{
    deserialize_opt_series, deserialize_series, round_to, BaselineMethod, BaselineWindow,
    SeriesResolution, Series,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Backend route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Regular baseline fit
    Standard,
    /// Running-total baseline for non-seasonal cumulative charts
    Cumulative,
}

impl Endpoint {
    /// The cumulative route is only used for yearly-family cumulative charts
    pub fn select(cumulative: bool, seasonality: u8) -> Self {
        if cumulative && seasonality == 1 {
            Endpoint::Cumulative
        } else {
            Endpoint::Standard
        }
    }

    /// Path appended to the base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Standard => "/",
            Endpoint::Cumulative => "/cum",
        }
    }

    /// Full URL for a base URL
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Standard => f.write_str("standard"),
            Endpoint::Cumulative => f.write_str("cumulative"),
        }
    }
}

/// Request payload sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRequest {
    /// Full series, rounded; missing values serialize as null
    pub y: Series,
    /// 1-indexed window start
    pub bs: usize,
    /// 1-indexed window end
    pub be: usize,
    /// Trend flag (0 or 1)
    pub t: u8,
    /// Seasonality period, omitted on the cumulative endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u8>,
    /// Method name, omitted on the cumulative endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
    /// Start-period token of `y[0]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xs: Option<String>,
}

/// Inputs needed to build a [`BaselineRequest`]
#[derive(Debug, Clone, Copy)]
pub struct RequestSpec<'a> {
    /// Observed series
    pub values: &'a [Option<f64>],
    /// Reference window
    pub window: BaselineWindow,
    /// Requested method
    pub method: BaselineMethod,
    /// Series resolution
    pub resolution: SeriesResolution,
    /// First label of the sequence
    pub first_label: Option<&'a str>,
    /// Target endpoint
    pub endpoint: Endpoint,
    /// Decimals kept in `y`
    pub decimals: u32,
}

impl BaselineRequest {
    /// Build the payload for an endpoint
    pub fn build(spec: RequestSpec<'_>) -> Self {
        let (bs, be) = spec.window.backend_bounds();
        let seasonal = spec.endpoint == Endpoint::Standard;
        Self {
            y: spec
                .values
                .iter()
                .map(|v| v.map(|x| round_to(x, spec.decimals)))
                .collect(),
            bs,
            be,
            t: u8::from(spec.method.has_trend()),
            s: seasonal.then(|| season_type(spec.resolution)),
            m: seasonal.then(|| spec.method.as_str().to_string()),
            xs: spec
                .first_label
                .and_then(|label| label_to_xs_param(label, spec.resolution)),
        }
    }

    /// Query-string form used for GET requests; missing values are sent as `NA`
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let y = self
            .y
            .iter()
            .map(|v| match v {
                Some(x) => x.to_string(),
                None => "NA".to_string(),
            })
            .collect::<Vec<_>>()
            .join(",");

        let mut pairs = vec![
            ("y", y),
            ("bs", self.bs.to_string()),
            ("be", self.be.to_string()),
            ("t", self.t.to_string()),
        ];
        if let Some(s) = self.s {
            pairs.push(("s", s.to_string()));
        }
        if let Some(m) = &self.m {
            pairs.push(("m", m.clone()));
        }
        if let Some(xs) = &self.xs {
            pairs.push(("xs", xs.clone()));
        }
        pairs
    }
}

/// Decoded backend response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BaselineResponse {
    /// Baseline values
    #[serde(deserialize_with = "deserialize_series")]
    pub y: Series,
    /// Lower prediction interval
    #[serde(default, deserialize_with = "deserialize_series")]
    pub lower: Series,
    /// Upper prediction interval
    #[serde(default, deserialize_with = "deserialize_series")]
    pub upper: Series,
    /// Optional z-scores
    #[serde(default, deserialize_with = "deserialize_opt_series")]
    pub zscore: Option<Series>,
}

impl BaselineResponse {
    /// Decode a response body
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| BaselineError::parse(e.to_string()))
    }

    /// Truncate (forecast horizon) or pad every array to `len`
    pub fn fit_to(mut self, len: usize) -> Self {
        self.y.resize(len, None);
        self.lower.resize(len, None);
        self.upper.resize(len, None);
        if let Some(zscore) = self.zscore.as_mut() {
            zscore.resize(len, None);
        }
        self
    }
}

/// A backend call waiting for admission
pub type QueueTask<'a> = BoxFuture<'a, Result<String>>;

/// Outside-world capabilities of the pipeline.
///
/// Production code talks HTTP through [`HttpTransport`]; tests substitute
/// scripted transports.
#[async_trait]
pub trait BaselineTransport: Send + Sync {
    /// Perform one request and return the raw response body
    async fn fetch(&self, endpoint: Endpoint, request: &BaselineRequest) -> Result<String>;

    /// Run a task under the transport's admission control
    async fn enqueue<'a>(&'a self, task: QueueTask<'a>) -> Result<String>;

    /// Queue that `enqueue` admits through, if the transport has one
    fn admission_queue(&self) -> Option<&Arc<RequestQueue>> {
        None
    }
}

/// Shared transport handle
pub type BoxedTransport = Arc<dyn BaselineTransport>;
