//! Configuration module for the pipeline.
//!
//! Provides structured configuration loading from environment variables,
//! organized by domain: pipeline tuning and observability.

mod observability_config;
mod pipeline_config;

pub use observability_config::ObservabilityEnvConfig;
pub use pipeline_config::PipelineEnvConfig;

use anyhow::Context;

/// Top-level configuration aggregating all sub-configs.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineEnvConfig,
    pub observability: ObservabilityEnvConfig,
    pub database_url: String,
    pub provider_ws_url: String,
    pub provider_api_key: String,
    pub provider_api_secret: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// documented defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let pipeline = PipelineEnvConfig::from_env().context("failed to load pipeline config")?;
        let observability = ObservabilityEnvConfig::from_env();

        Ok(Self {
            pipeline,
            observability,
            database_url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://candlestream.db".to_string()),
            provider_ws_url: std::env::var("PROVIDER_WS_URL")
                .unwrap_or_else(|_| "wss://stream.example-provider.test/v2".to_string()),
            provider_api_key: std::env::var("PROVIDER_API_KEY").unwrap_or_default(),
            provider_api_secret: std::env::var("PROVIDER_API_SECRET").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_succeeds_with_defaults() {
        let config = Config::from_env().expect("should parse with defaults");
        assert_eq!(config.pipeline.max_workers, 100);
    }
}
