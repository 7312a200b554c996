//! Engine parameters and configuration file support.
//!
//! [`EngineConfig`] carries every tunable of the rebalancing core and is
//! passed explicitly into each component. [`BacktestFileConfig`] loads a
//! whole backtest definition from TOML for reproducible runs.

use crate::backtest::BacktestConfig;
use crate::error::{LeverError, Result};
use crate::types::WeightVector;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Parameters of the rebalancing core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target exposure as a multiple of equity.
    pub leverage: f64,
    /// Exposure floor as a multiple of equity.
    pub min_leverage: f64,
    /// Upper bound accepted for `leverage`.
    pub max_leverage: f64,
    /// Per-asset weight cap.
    pub max_weight: f64,
    /// Per-asset weight floor.
    pub min_weight: f64,
    /// Drawdown magnitude (e.g. 0.12) at which capital is redeployed.
    pub drawdown_redeploy_threshold: f64,
    /// Absolute weight drift at which the portfolio is rebalanced.
    pub weight_deviation_threshold: f64,
    /// Number of daily equity returns used for realised volatility.
    pub volatility_lookback_days: usize,
    /// Realised volatility at or below which capital is deployed.
    pub volatility_redeploy_threshold: f64,
    /// Cap on the deploy fraction of any single period.
    pub gradual_deploy_factor: f64,
    /// Multiplier applied to sample mean returns (0 to 1).
    pub mean_return_shrinkage: f64,
    /// Annual risk-free rate.
    pub risk_free_rate: f64,
    pub yearly_trading_days: u32,
    /// Rebalance periods required before dynamic re-optimisation.
    pub min_periods_for_optimization: usize,
    /// Aligned return observations required before dynamic re-optimisation.
    pub min_observations_for_optimization: usize,
    /// Raw return points a symbol needs to enter the moment estimate.
    pub min_history_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            leverage: 2.0,
            min_leverage: 1.0,
            max_leverage: 3.0,
            max_weight: 0.9,
            min_weight: 0.05,
            drawdown_redeploy_threshold: 0.12,
            weight_deviation_threshold: 0.10,
            volatility_lookback_days: 20,
            volatility_redeploy_threshold: 0.25,
            gradual_deploy_factor: 0.5,
            mean_return_shrinkage: 0.5,
            risk_free_rate: 0.02,
            yearly_trading_days: 252,
            min_periods_for_optimization: 6,
            min_observations_for_optimization: 20,
            min_history_points: 30,
        }
    }
}

impl EngineConfig {
    /// Check parameter ranges. A weight band that no allocation can satisfy
    /// is accepted here and surfaces later as an infeasible optimisation.
    pub fn validate(&self) -> Result<()> {
        if self.min_leverage < 0.0 {
            return Err(LeverError::ConfigError(format!(
                "min_leverage must be non-negative, got {}",
                self.min_leverage
            )));
        }
        if self.min_leverage > self.max_leverage {
            return Err(LeverError::ConfigError(format!(
                "min_leverage {} exceeds max_leverage {}",
                self.min_leverage, self.max_leverage
            )));
        }
        if self.leverage < self.min_leverage || self.leverage > self.max_leverage {
            return Err(LeverError::ConfigError(format!(
                "leverage {} outside [{}, {}]",
                self.leverage, self.min_leverage, self.max_leverage
            )));
        }
        if !(0.0..=1.0).contains(&self.min_weight) || !(0.0..=1.0).contains(&self.max_weight) {
            return Err(LeverError::ConfigError(
                "min_weight and max_weight must lie in [0, 1]".to_string(),
            ));
        }
        if self.min_weight > self.max_weight {
            return Err(LeverError::ConfigError(format!(
                "min_weight {} exceeds max_weight {}",
                self.min_weight, self.max_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.mean_return_shrinkage) {
            return Err(LeverError::ConfigError(format!(
                "mean_return_shrinkage must lie in [0, 1], got {}",
                self.mean_return_shrinkage
            )));
        }
        if self.gradual_deploy_factor <= 0.0 || self.gradual_deploy_factor > 1.0 {
            return Err(LeverError::ConfigError(format!(
                "gradual_deploy_factor must lie in (0, 1], got {}",
                self.gradual_deploy_factor
            )));
        }
        if self.yearly_trading_days == 0 {
            return Err(LeverError::ConfigError(
                "yearly_trading_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trading_days(&self) -> f64 {
        self.yearly_trading_days as f64
    }
}

/// Complete backtest definition loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Static target weights by symbol.
    #[serde(default)]
    pub portfolio: BTreeMap<String, f64>,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// General backtest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    /// Capital added at every rebalance after the first.
    #[serde(default)]
    pub monthly_contribution: f64,
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    #[serde(default)]
    pub end_date: Option<String>,
    /// Re-optimise weights once enough history is available.
    #[serde(default)]
    pub dynamic_optimization: bool,
}

fn default_capital() -> f64 { 10_000.0 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            monthly_contribution: 0.0,
            start_date: None,
            end_date: None,
            dynamic_optimization: false,
        }
    }
}

fn parse_date(field: &str, value: Option<&String>) -> Result<NaiveDate> {
    let value =
        value.ok_or_else(|| LeverError::ConfigError(format!("missing backtest.{}", field)))?;
    Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?)
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| LeverError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to the driver's [`BacktestConfig`].
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        self.engine.validate()?;

        if self.portfolio.is_empty() {
            return Err(LeverError::ConfigError(
                "portfolio must list at least one symbol".to_string(),
            ));
        }
        if self.portfolio.values().any(|w| *w < 0.0) {
            return Err(LeverError::ConfigError(
                "portfolio weights must be non-negative".to_string(),
            ));
        }

        let start_date = parse_date("start_date", self.backtest.start_date.as_ref())?;
        let end_date = parse_date("end_date", self.backtest.end_date.as_ref())?;
        if end_date < start_date {
            return Err(LeverError::ConfigError(format!(
                "end_date {} precedes start_date {}",
                end_date, start_date
            )));
        }

        Ok(BacktestConfig {
            initial_capital: self.backtest.initial_capital,
            monthly_contribution: self.backtest.monthly_contribution,
            start_date,
            end_date,
            static_weights: WeightVector::new(self.portfolio.clone()).normalized(),
            dynamic_optimization: self.backtest.dynamic_optimization,
            engine: self.engine.clone(),
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Leveraged rebalancing backtest

[backtest]
initial_capital = 10000.0
monthly_contribution = 500.0
start_date = "2015-01-01"
end_date = "2024-12-31"
dynamic_optimization = true

# Static weights, also the fallback when optimisation is not possible
[portfolio]
UPRO = 0.5
TMF = 0.3
GLD = 0.2

[engine]
leverage = 2.0
min_leverage = 1.0
max_leverage = 3.0
max_weight = 0.9
min_weight = 0.05
drawdown_redeploy_threshold = 0.12   # redeploy after a 12% drawdown
weight_deviation_threshold = 0.10
volatility_lookback_days = 20
volatility_redeploy_threshold = 0.25
gradual_deploy_factor = 0.5
mean_return_shrinkage = 0.5
risk_free_rate = 0.02
yearly_trading_days = 252
min_periods_for_optimization = 6
min_observations_for_optimization = 20
min_history_points = 30
"#
        .to_string()
    }
}
