//! Baseline HTTP server
//!
//! Usage: `baseline-server [config.json]`. The config path may also come
//! from `BASELINE_CONFIG`; `BASELINE_*` variables override file values.

use mortality_baseline::config::PipelineConfig;
use mortality_baseline::server::{self, ServerConfig, BIND_ADDR_ENV};
use mortality_baseline::PipelineBuilder;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "BASELINE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    let config = match config_path {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides()?;

    let mut server_config = ServerConfig::default();
    if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
        server_config = server_config.with_addr_str(&addr)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend.base_url,
        "Starting baseline server"
    );

    let pipeline = Arc::new(PipelineBuilder::new().with_config(config).build()?);
    server::serve(pipeline, server_config).await?;
    Ok(())
}
