//! Period-by-period backtest driver.
//!
//! Each rebalance date is processed strictly in order: mark to market, add
//! contributions, refresh statistics, optionally re-optimise weights, score
//! signals, size exposure, allocate positions, then simulate the daily curve
//! up to the next boundary. The [`PortfolioState`] is threaded through by
//! value; no period sees another's intermediate state.
//!
//! # Example
//!
//! ```no_run
//! use lever::backtest::Backtester;
//! use lever::config::BacktestFileConfig;
//! use lever::data::{InMemoryPriceSource, PriceCsvConfig};
//! use lever::sink::NullSink;
//!
//! let config = BacktestFileConfig::load("backtest.toml")?.to_backtest_config()?;
//! let prices = InMemoryPriceSource::from_dir("data/", "*.csv", &PriceCsvConfig::default())?;
//!
//! let result = Backtester::new(config)?.run(&prices, &mut NullSink)?;
//! println!("Final equity: {:.2}", result.metrics.final_equity);
//! # Ok::<(), lever::LeverError>(())
//! ```

use crate::analytics::PerformanceMetrics;
use crate::config::EngineConfig;
use crate::data::PriceSource;
use crate::error::{LeverError, Result};
use crate::moments::estimate_moments;
use crate::optimizer::{optimize_from_moments, OptimizerConfig};
use crate::portfolio::PortfolioState;
use crate::returns::returns_by_symbol;
use crate::signals::calculate_deploy_signals;
use crate::simulation::{simulate_daily_equity_series, SimulationRequest};
use crate::sink::EventSink;
use crate::sizing::{calculate_positions, calculate_target_exposure};
use crate::types::{AssetSeries, EquityPoint, Positions, RebalanceEvent, WeightVector};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Days of history fetched before a period start so the first day can be
/// priced from the last close.
const PRICE_SEED_DAYS: i64 = 14;

/// Backtest definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Added at every rebalance date after the first.
    pub monthly_contribution: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Target weights used until (and whenever) optimisation is unavailable.
    pub static_weights: WeightVector,
    pub dynamic_optimization: bool,
    pub engine: EngineConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            monthly_contribution: 0.0,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or_default(),
            static_weights: WeightVector::default(),
            dynamic_optimization: false,
            engine: EngineConfig::default(),
        }
    }
}

/// Everything a backtest produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub events: Vec<RebalanceEvent>,
    pub daily_series: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub final_state: PortfolioState,
}

impl BacktestResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the result as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        info!("Saved backtest result to: {}", path.display());
        Ok(())
    }
}

/// `start`, followed by the first day of every later month up to `end`.
pub fn rebalance_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    if start > end {
        return dates;
    }
    dates.push(start);
    let mut cursor = next_month_start(start);
    while let Some(date) = cursor.filter(|d| *d <= end) {
        dates.push(date);
        cursor = next_month_start(date);
    }
    dates
}

fn next_month_start(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)?.checked_add_months(Months::new(1))
}

/// One rebalance period: decision on `date`, simulation through `end`.
#[derive(Debug, Clone, Copy)]
struct Period {
    index: usize,
    date: NaiveDate,
    previous: Option<NaiveDate>,
    end: NaiveDate,
}

/// Drives a backtest over monthly rebalance periods.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: BacktestConfig,
    optimizer: OptimizerConfig,
}

impl Backtester {
    /// Validate `config` and build a driver.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.engine.validate()?;
        if config.static_weights.is_empty() {
            return Err(LeverError::ConfigError(
                "static weights must list at least one symbol".to_string(),
            ));
        }
        if config.static_weights.iter().any(|(_, w)| w < 0.0) || config.static_weights.sum() <= 0.0
        {
            return Err(LeverError::ConfigError(
                "static weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if config.end_date < config.start_date {
            return Err(LeverError::ConfigError(format!(
                "end_date {} precedes start_date {}",
                config.end_date, config.start_date
            )));
        }
        if config.initial_capital <= 0.0 || config.monthly_contribution < 0.0 {
            return Err(LeverError::ConfigError(
                "initial_capital must be positive and monthly_contribution non-negative"
                    .to_string(),
            ));
        }

        let optimizer = OptimizerConfig::from(&config.engine);
        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run every period in order and return the collected output.
    pub fn run(
        &self,
        source: &dyn PriceSource,
        sink: &mut dyn EventSink,
    ) -> Result<BacktestResult> {
        let dates = rebalance_dates(self.config.start_date, self.config.end_date);
        info!(
            "Starting backtest: {} periods from {} to {}, {} symbols",
            dates.len(),
            self.config.start_date,
            self.config.end_date,
            self.config.static_weights.len()
        );

        let mut state = PortfolioState::new(self.config.initial_capital);
        let mut weights = self.config.static_weights.normalized();
        let mut events = Vec::with_capacity(dates.len());

        for (index, date) in dates.iter().copied().enumerate() {
            let end = match dates.get(index + 1) {
                Some(next) => *next - Duration::days(1),
                None => self.config.end_date,
            };
            let period = Period {
                index,
                date,
                previous: index.checked_sub(1).map(|i| dates[i]),
                end,
            };

            let (next_state, event) = self.process_period(&period, state, &weights, source, sink);
            weights = event.weights.clone();
            state = next_state;
            events.push(event);
        }

        let metrics = PerformanceMetrics::calculate(
            &state.daily_equity_history,
            &events,
            self.config.engine.risk_free_rate,
            self.config.engine.trading_days(),
        );
        sink.record_metrics(&metrics);

        info!(
            "Backtest complete: final equity {:.2}, contributed {:.2}, max drawdown {:.2}%",
            metrics.final_equity,
            metrics.total_contributed,
            metrics.max_drawdown * 100.0
        );

        Ok(BacktestResult {
            events,
            daily_series: state.daily_equity_history.clone(),
            metrics,
            final_state: state,
        })
    }

    /// Decide and simulate one period, returning the updated state and the
    /// period's event.
    fn process_period(
        &self,
        period: &Period,
        state: PortfolioState,
        weights: &WeightVector,
        source: &dyn PriceSource,
        sink: &mut dyn EventSink,
    ) -> (PortfolioState, RebalanceEvent) {
        let engine = &self.config.engine;
        let symbols: Vec<&str> = self.config.static_weights.symbols().collect();

        let mut prices = BTreeMap::new();
        for symbol in &symbols {
            match source.price_on_or_before(symbol, period.date) {
                Some(price) => {
                    prices.insert(symbol.to_string(), price);
                }
                None => warn!("No price for {} on or before {}", symbol, period.date),
            }
        }

        let mut state = state.mark_to_market(|s| prices.get(s).copied());
        let contribution = if period.index == 0 {
            self.config.initial_capital
        } else {
            state = state.with_contribution(self.config.monthly_contribution);
            self.config.monthly_contribution
        };

        let history_start = period
            .previous
            .map(|p| p + Duration::days(1))
            .unwrap_or(period.date);
        for symbol in &symbols {
            if let Some(series) = source.series(symbol, history_start, period.date) {
                state = state.append_prices(symbol, series.prices());
            }
        }

        let (weights, reoptimized) = self.select_weights(period, &state, weights);
        let signals = calculate_deploy_signals(&state, &weights, engine);

        let current_exposure = state.exposure;
        let target_exposure = if period.index == 0 {
            state.equity * engine.leverage
        } else {
            calculate_target_exposure(
                state.equity,
                current_exposure,
                state.pending_contribution,
                signals.deploy_fraction,
                engine,
            )
        };

        let mut positions = calculate_positions(target_exposure, &weights, &prices);
        for (symbol, held) in &state.positions {
            if weights.get(symbol) > 0.0 && !prices.contains_key(symbol) {
                positions.insert(symbol.clone(), *held);
            }
        }

        let pending = if period.index == 0 {
            0.0
        } else {
            let deployed = (target_exposure - current_exposure).max(0.0) / engine.leverage;
            state.pending_contribution - deployed
        };
        let state = state.with_rebalance(positions, pending);

        debug!(
            "Period {} ({}): equity {:.2}, exposure {:.2}, triggered {}, deploy {:.2}, reoptimized {}",
            period.index,
            period.date,
            state.equity,
            state.exposure,
            signals.is_triggered(),
            signals.deploy_fraction,
            reoptimized
        );

        let event = RebalanceEvent {
            date: period.date,
            period_index: period.index,
            equity: state.equity,
            contribution,
            target_exposure,
            borrow: state.borrow,
            positions: state.positions.clone(),
            weights,
            signals,
            reoptimized,
        };

        sink.record_event(&event);

        let state = self.simulate_period(period, state, source, sink);
        (state, event)
    }

    /// Re-optimise when enabled and enough history exists, otherwise keep
    /// the previous weights.
    fn select_weights(
        &self,
        period: &Period,
        state: &PortfolioState,
        previous: &WeightVector,
    ) -> (WeightVector, bool) {
        let engine = &self.config.engine;
        if !self.config.dynamic_optimization || period.index < engine.min_periods_for_optimization
        {
            return (previous.clone(), false);
        }

        let universe: BTreeMap<String, Vec<f64>> = state
            .price_history
            .iter()
            .filter(|(s, _)| self.config.static_weights.contains(s))
            .map(|(s, p)| (s.clone(), p.clone()))
            .collect();
        let returns = returns_by_symbol(&universe);

        let estimate = match estimate_moments(
            &returns,
            engine.mean_return_shrinkage,
            engine.min_history_points,
        ) {
            Some(est)
                if est.observations >= engine.min_observations_for_optimization
                    && est.symbols.len() >= 2 =>
            {
                est
            }
            _ => {
                warn!(
                    "Insufficient history on {}, keeping previous weights",
                    period.date
                );
                return (previous.clone(), false);
            }
        };

        match optimize_from_moments(&estimate, &self.optimizer) {
            Ok(result) if result.is_feasible() => {
                debug!(
                    "Re-optimised weights on {} over {} observations, sharpe {:.3}",
                    period.date, estimate.observations, result.sharpe_ratio
                );
                (result.weights, true)
            }
            Ok(_) => {
                warn!(
                    "Infeasible optimisation on {}, keeping previous weights",
                    period.date
                );
                (previous.clone(), false)
            }
            Err(e) => {
                warn!("Optimisation failed on {}: {}", period.date, e);
                (previous.clone(), false)
            }
        }
    }

    fn simulate_period(
        &self,
        period: &Period,
        state: PortfolioState,
        source: &dyn PriceSource,
        sink: &mut dyn EventSink,
    ) -> PortfolioState {
        let seed_start = period.date - Duration::days(PRICE_SEED_DAYS);
        let price_series: BTreeMap<String, AssetSeries> = state
            .positions
            .keys()
            .filter_map(|symbol| {
                source
                    .series(symbol, seed_start, period.end)
                    .map(|series| (symbol.clone(), series))
            })
            .collect();

        let positions: Positions = state.positions.clone();
        let request = SimulationRequest {
            positions: &positions,
            borrow: state.borrow,
            price_series: &price_series,
            period_start: period.date,
            period_end: period.end,
            fallback_exposure: state.exposure,
            fallback_equity: state.equity,
        };
        let outcome = simulate_daily_equity_series(&state, &request);
        sink.record_daily(&outcome.daily_series);
        state.advance(&outcome)
    }
}
