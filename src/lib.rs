//! Lever - a leveraged portfolio rebalancing and backtest engine.
//!
//! # Overview
//!
//! Lever simulates a leveraged multi-asset portfolio that is rebalanced
//! once a month:
//!
//! - **Return statistics**: log returns, shrunk means and sample covariance
//! - **Weight optimisation**: leverage-adjusted maximum Sharpe ratio under
//!   per-asset weight bounds, via a deterministic Nelder-Mead simplex
//! - **Deploy signals**: drawdown, weight drift and realised volatility
//! - **Exposure sizing**: a ratchet between a minimum-leverage floor and
//!   full leveraged equity, with gradual deployment of new contributions
//! - **Daily simulation**: mark-to-market with last-observation-carried-forward
//!   pricing, peak equity and drawdown tracking
//!
//! Every component is a plain function of its inputs. The only mutable
//! value, [`PortfolioState`], is owned by the period loop and passed in
//! explicitly.
//!
//! # Quick Start
//!
//! ```
//! use lever::{
//!     calculate_deploy_signals, calculate_positions, calculate_target_exposure,
//!     EngineConfig, PortfolioState, WeightVector,
//! };
//! use std::collections::BTreeMap;
//!
//! let config = EngineConfig::default();
//! let weights = WeightVector::from_pairs([("UPRO", 0.6), ("TMF", 0.4)]);
//! let state = PortfolioState::new(10_000.0);
//!
//! let signals = calculate_deploy_signals(&state, &weights, &config);
//! let target = calculate_target_exposure(
//!     state.equity,
//!     state.exposure,
//!     0.0,
//!     signals.deploy_fraction,
//!     &config,
//! );
//!
//! let prices: BTreeMap<String, f64> =
//!     [("UPRO".to_string(), 60.0), ("TMF".to_string(), 8.0)].into_iter().collect();
//! let positions = calculate_positions(target, &weights, &prices);
//! assert_eq!(positions.len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (AssetSeries, WeightVector, DeploySignals, RebalanceEvent)
//! - [`returns`]: Log-return series
//! - [`moments`]: Mean and covariance estimation
//! - [`optimizer`]: Leveraged Sharpe ratio optimisation
//! - [`signals`]: Drawdown, weight-deviation and volatility signals
//! - [`sizing`]: Target exposure and position allocation
//! - [`portfolio`]: Portfolio state accumulator
//! - [`simulation`]: Daily equity simulation
//! - [`backtest`]: Monthly rebalance driver
//! - [`data`]: Price sources and CSV loading
//! - [`sink`]: Output persistence
//! - [`analytics`]: Performance metrics
//! - [`config`]: Engine parameters and TOML configuration files

pub mod analytics;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod moments;
pub mod optimizer;
pub mod portfolio;
pub mod returns;
pub mod signals;
pub mod simulation;
pub mod sink;
pub mod sizing;
pub mod types;

// Re-exports for convenience
pub use analytics::PerformanceMetrics;
pub use backtest::{BacktestConfig, BacktestResult, Backtester};
pub use config::{BacktestFileConfig, EngineConfig};
pub use data::{InMemoryPriceSource, PriceCsvConfig, PriceSource};
pub use error::{LeverError, Result};
pub use moments::{estimate_moments, MomentsEstimate};
pub use optimizer::{optimize_portfolio, OptimizationResult, OptimizerConfig};
pub use portfolio::PortfolioState;
pub use returns::log_returns;
pub use signals::calculate_deploy_signals;
pub use simulation::{simulate_daily_equity_series, SimulationOutcome, SimulationRequest};
pub use sink::{EventSink, MemorySink, NullSink};
pub use sizing::{calculate_positions, calculate_target_exposure};
pub use types::{
    AssetSeries, DeploySignals, EquityPoint, Position, Positions, RebalanceEvent, WeightVector,
};
