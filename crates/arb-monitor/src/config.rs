//! Configuration for the monitor.
//!
//! The config file is JSON with a fixed, validated schema. Unknown keys
//! are rejected at load rather than silently ignored; a config problem is
//! always fatal at startup (exit code 1).

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use arb_common::MarketPair;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Contract pairs to monitor.
    pub market_pairs: Vec<MarketPair>,

    /// Polling cadence and run duration.
    pub monitoring: MonitoringConfig,

    /// Cost assumptions feeding the net-spread calculation.
    pub cost_assumptions: CostConfig,

    /// Opaque alerting block, passed verbatim to the alert sink.
    #[serde(default)]
    pub alerting: Option<serde_json::Value>,

    /// Kalshi API key; `KALSHI_API_KEY` overrides this.
    #[serde(default)]
    pub kalshi_api_key: Option<String>,

    /// Logging level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    /// Base polling interval in seconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,

    /// Graceful-shutdown deadline in hours; absent means run forever.
    #[serde(default)]
    pub monitoring_duration_hours: Option<f64>,

    /// Checkpoint cadence in seconds. Doubles as the restore grace window.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval(),
            monitoring_duration_hours: None,
            checkpoint_interval_seconds: default_checkpoint_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Per-trade gas cost in USD, applied twice (entry and exit).
    pub gas_fee_per_trade_usd: Decimal,

    /// Kalshi contract size used in the fee formula.
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_polling_interval() -> u64 {
    2
}

fn default_checkpoint_interval() -> u64 {
    300
}

fn default_contract_size() -> Decimal {
    Decimal::ONE
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides for credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("KALSHI_API_KEY") {
            if !key.trim().is_empty() {
                self.kalshi_api_key = Some(key);
            }
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_pairs.is_empty() {
            return Err(invalid("market_pairs must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for pair in &self.market_pairs {
            if pair.pair_id.trim().is_empty() {
                return Err(invalid("market pair with empty pair_id"));
            }
            if !seen.insert(pair.pair_id.as_str()) {
                return Err(invalid(format!("duplicate pair_id: {}", pair.pair_id)));
            }
            if pair.kalshi_ticker.trim().is_empty()
                || pair.kalshi_market_id.trim().is_empty()
                || pair.polymarket_token.trim().is_empty()
                || pair.polymarket_market_id.trim().is_empty()
            {
                return Err(invalid(format!(
                    "pair {} is missing an instrument identifier",
                    pair.pair_id
                )));
            }
        }

        if self.monitoring.polling_interval_seconds == 0 {
            return Err(invalid("monitoring.polling_interval_seconds must be > 0"));
        }
        if let Some(hours) = self.monitoring.monitoring_duration_hours {
            if hours <= 0.0 {
                return Err(invalid("monitoring.monitoring_duration_hours must be > 0"));
            }
        }
        if self.monitoring.checkpoint_interval_seconds == 0 {
            return Err(invalid("monitoring.checkpoint_interval_seconds must be > 0"));
        }

        if self.cost_assumptions.gas_fee_per_trade_usd < Decimal::ZERO {
            return Err(invalid("cost_assumptions.gas_fee_per_trade_usd must be ≥ 0"));
        }
        if self.cost_assumptions.contract_size <= Decimal::ZERO {
            return Err(invalid("cost_assumptions.contract_size must be > 0"));
        }

        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.polling_interval_seconds)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.checkpoint_interval_seconds)
    }

    /// Run-duration limit, if one is configured.
    pub fn duration_limit(&self) -> Option<Duration> {
        self.monitoring
            .monitoring_duration_hours
            .map(|hours| Duration::from_secs_f64(hours * 3600.0))
    }
}
