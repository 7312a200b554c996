//! Portfolio state threaded through the rebalance loop.
//!
//! The state has a single owner, the period driver. Every transition
//! consumes the prior state and returns the updated one, so a period can
//! never observe a half-applied update.

use crate::simulation::SimulationOutcome;
use crate::types::{EquityPoint, Position, Positions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Account state at a period boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub equity: f64,
    /// Market value of all positions.
    pub exposure: f64,
    /// Borrowed capital (`exposure - equity`); negative means idle cash.
    pub borrow: f64,
    /// Highest equity seen so far. Never decreases.
    pub peak_equity: f64,
    /// Contributions received but not yet deployed by a signal.
    pub pending_contribution: f64,
    pub positions: Positions,
    pub daily_equity_history: Vec<EquityPoint>,
    /// Observed prices per symbol, oldest first.
    pub price_history: BTreeMap<String, Vec<f64>>,
}

impl PortfolioState {
    /// Fresh account holding `initial_capital` in cash.
    pub fn new(initial_capital: f64) -> Self {
        Self {
            equity: initial_capital,
            exposure: 0.0,
            borrow: -initial_capital,
            peak_equity: initial_capital.max(0.0),
            pending_contribution: 0.0,
            positions: Positions::new(),
            daily_equity_history: Vec::new(),
            price_history: BTreeMap::new(),
        }
    }

    /// Exposure divided by equity, zero when equity is not positive.
    pub fn leverage(&self) -> f64 {
        if self.equity > 0.0 {
            self.exposure / self.equity
        } else {
            0.0
        }
    }

    /// Daily equity values in chronological order.
    pub fn equity_values(&self) -> Vec<f64> {
        self.daily_equity_history.iter().map(|p| p.equity).collect()
    }

    /// Revalue positions at `price_of`. Symbols without a price keep their
    /// last value.
    pub fn mark_to_market(mut self, price_of: impl Fn(&str) -> Option<f64>) -> Self {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(price) = price_of(symbol) {
                position.value = position.quantity * price;
            }
        }
        self.exposure = self.positions.values().map(|p| p.value).sum();
        self.equity = self.exposure - self.borrow;
        self
    }

    /// Add new capital. It counts toward equity immediately but stays
    /// pending until a signal deploys it.
    pub fn with_contribution(mut self, amount: f64) -> Self {
        self.equity += amount;
        self.borrow -= amount;
        self.pending_contribution += amount;
        self
    }

    /// Append newly observed prices for `symbol`.
    pub fn append_prices(mut self, symbol: &str, prices: &[f64]) -> Self {
        self.price_history
            .entry(symbol.to_string())
            .or_default()
            .extend_from_slice(prices);
        self
    }

    /// Install the positions chosen at a rebalance.
    pub fn with_rebalance(mut self, positions: Positions, pending_contribution: f64) -> Self {
        self.exposure = positions.values().map(|p| p.value).sum();
        self.borrow = self.exposure - self.equity;
        self.positions = positions;
        self.pending_contribution = pending_contribution.max(0.0);
        self.peak_equity = self.peak_equity.max(self.equity);
        self
    }

    /// Fold a simulated period into the state.
    pub fn advance(mut self, outcome: &SimulationOutcome) -> Self {
        for (symbol, price) in &outcome.last_prices {
            if let Some(position) = self.positions.get_mut(symbol) {
                *position = Position {
                    quantity: position.quantity,
                    value: position.quantity * price,
                };
            }
        }
        self.equity = outcome.last_equity;
        self.exposure = outcome.last_exposure;
        self.peak_equity = self.peak_equity.max(outcome.peak_equity);
        self.daily_equity_history
            .extend_from_slice(&outcome.daily_series);
        self
    }
}
