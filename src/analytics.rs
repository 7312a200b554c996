//! Performance metrics of a leveraged backtest.

use crate::moments::{mean, sample_std};
use crate::types::{EquityPoint, RebalanceEvent};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary statistics of a backtest's daily equity curve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub final_equity: f64,
    /// Initial capital plus every later contribution.
    pub total_contributed: f64,
    /// Final equity relative to contributed capital, minus one.
    pub total_return: f64,
    /// Mean time-weighted daily return times trading days per year.
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    /// Most negative drawdown on the curve (zero or negative). Positive
    /// values on new highs are ignored.
    pub max_drawdown: f64,
    pub trading_days: usize,
    pub rebalances: usize,
    pub reoptimizations: usize,
    pub drawdown_triggers: usize,
    pub weight_deviation_triggers: usize,
    pub volatility_triggers: usize,
}

impl PerformanceMetrics {
    /// Compute metrics from the daily curve and the rebalance events that
    /// produced it.
    pub fn calculate(
        series: &[EquityPoint],
        events: &[RebalanceEvent],
        risk_free_rate: f64,
        trading_days_per_year: f64,
    ) -> Self {
        let contributions: BTreeMap<NaiveDate, f64> = events
            .iter()
            .map(|e| (e.date, e.contribution))
            .collect();
        let returns = time_weighted_returns(series, &contributions);

        let annualized_return = mean(&returns) * trading_days_per_year;
        let annualized_volatility = if returns.len() > 1 {
            sample_std(&returns) * trading_days_per_year.sqrt()
        } else {
            0.0
        };
        let sharpe_ratio = if annualized_volatility > 0.0 {
            (annualized_return - risk_free_rate) / annualized_volatility
        } else {
            0.0
        };

        let total_contributed: f64 = events.iter().map(|e| e.contribution).sum();
        let final_equity = series.last().map(|p| p.equity).unwrap_or(0.0);
        let total_return = if total_contributed > 0.0 {
            final_equity / total_contributed - 1.0
        } else {
            0.0
        };

        Self {
            start_date: series.first().map(|p| p.date),
            end_date: series.last().map(|p| p.date),
            final_equity,
            total_contributed,
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown: series.iter().map(|p| p.drawdown).fold(0.0, f64::min),
            trading_days: series.len(),
            rebalances: events.len(),
            reoptimizations: events.iter().filter(|e| e.reoptimized).count(),
            drawdown_triggers: events.iter().filter(|e| e.signals.drawdown_triggered).count(),
            weight_deviation_triggers: events
                .iter()
                .filter(|e| e.signals.weight_deviation_triggered)
                .count(),
            volatility_triggers: events
                .iter()
                .filter(|e| e.signals.volatility_triggered)
                .count(),
        }
    }
}

/// Daily simple returns with contributions removed from the day they
/// arrive, so new capital does not read as performance.
pub fn time_weighted_returns(
    series: &[EquityPoint],
    contributions: &BTreeMap<NaiveDate, f64>,
) -> Vec<f64> {
    series
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| {
            let added = contributions.get(&w[1].date).copied().unwrap_or(0.0);
            (w[1].equity - added) / w[0].equity - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploySignals, Positions, WeightVector};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn point(day: u32, equity: f64, drawdown: f64) -> EquityPoint {
        EquityPoint {
            date: d(day),
            equity,
            exposure: equity * 2.0,
            drawdown,
        }
    }

    fn event(day: u32, contribution: f64, signals: DeploySignals) -> RebalanceEvent {
        RebalanceEvent {
            date: d(day),
            period_index: 0,
            equity: 0.0,
            contribution,
            target_exposure: 0.0,
            borrow: 0.0,
            positions: Positions::new(),
            weights: WeightVector::default(),
            signals,
            reoptimized: false,
        }
    }

    #[test]
    fn test_contributions_are_not_returns() {
        let series = vec![point(1, 100.0, 0.0), point(2, 110.0, 0.0), point(3, 160.0, 0.0)];
        let contributions: BTreeMap<NaiveDate, f64> = [(d(3), 50.0)].into_iter().collect();
        let r = time_weighted_returns(&series, &contributions);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!(r[1].abs() < 1e-12);
    }

    #[test]
    fn test_metrics_summary() {
        let series = vec![
            point(1, 1_000.0, 0.0),
            point(2, 1_100.0, 0.0),
            point(3, 990.0, -0.1),
            point(4, 1_650.0, 0.0),
        ];
        let dd = DeploySignals {
            drawdown_triggered: true,
            ..Default::default()
        };
        let events = vec![event(1, 1_000.0, DeploySignals::default()), event(4, 500.0, dd)];
        let m = PerformanceMetrics::calculate(&series, &events, 0.02, 252.0);

        assert_eq!(m.total_contributed, 1_500.0);
        assert_eq!(m.final_equity, 1_650.0);
        assert!((m.total_return - 0.1).abs() < 1e-12);
        assert_eq!(m.max_drawdown, -0.1);
        assert_eq!(m.trading_days, 4);
        assert_eq!(m.rebalances, 2);
        assert_eq!(m.drawdown_triggers, 1);
        assert_eq!(m.volatility_triggers, 0);
        assert!(m.annualized_volatility > 0.0);
        assert_eq!(m.start_date, Some(d(1)));
        assert_eq!(m.end_date, Some(d(4)));
    }

    #[test]
    fn test_empty_series() {
        let m = PerformanceMetrics::calculate(&[], &[], 0.02, 252.0);
        assert_eq!(m.final_equity, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.start_date, None);
    }
}
