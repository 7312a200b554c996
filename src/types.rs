//! Core data types for the rebalancing engine.

use crate::error::{LeverError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered daily price history for a single symbol.
///
/// Dates and prices are parallel arrays of equal length with strictly
/// increasing dates. The constructor rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
    symbol: String,
    dates: Vec<NaiveDate>,
    prices: Vec<f64>,
}

impl AssetSeries {
    /// Create a new series, validating the structural invariants.
    pub fn new(symbol: impl Into<String>, dates: Vec<NaiveDate>, prices: Vec<f64>) -> Result<Self> {
        let symbol = symbol.into();
        if dates.len() != prices.len() {
            return Err(LeverError::InvalidInput(format!(
                "Series {}: {} dates but {} prices",
                symbol,
                dates.len(),
                prices.len()
            )));
        }
        if let Some(pos) = dates.windows(2).position(|w| w[1] <= w[0]) {
            return Err(LeverError::InvalidInput(format!(
                "Series {}: dates not strictly increasing at index {}",
                symbol,
                pos + 1
            )));
        }
        Ok(Self {
            symbol,
            dates,
            prices,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Iterate over `(date, price)` pairs in date order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.prices.iter().copied())
    }

    /// Last positive price observed on or before `date`.
    pub fn price_on_or_before(&self, date: NaiveDate) -> Option<f64> {
        let end = self.dates.partition_point(|d| *d <= date);
        self.prices[..end].iter().rev().copied().find(|p| *p > 0.0)
    }

    /// Sub-series restricted to `[start, end]` (inclusive).
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> AssetSeries {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end).max(lo);
        AssetSeries {
            symbol: self.symbol.clone(),
            dates: self.dates[lo..hi].to_vec(),
            prices: self.prices[lo..hi].to_vec(),
        }
    }
}

/// A held quantity of one symbol and its market value at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub value: f64,
}

/// Positions keyed by symbol.
pub type Positions = BTreeMap<String, Position>;

/// Immutable mapping of symbol to portfolio weight.
///
/// Symbols are kept in sorted order so iteration, optimisation and
/// serialisation are deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector {
    weights: BTreeMap<String, f64>,
}

impl WeightVector {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    /// Build from `(symbol, weight)` pairs.
    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f64)>,
    {
        Self {
            weights: pairs.into_iter().map(|(s, w)| (s.into(), w)).collect(),
        }
    }

    /// Equal weights across `symbols`.
    pub fn equal<S: AsRef<str>>(symbols: &[S]) -> Self {
        if symbols.is_empty() {
            return Self::default();
        }
        let w = 1.0 / symbols.len() as f64;
        Self::from_pairs(symbols.iter().map(|s| (s.as_ref().to_string(), w)))
    }

    /// Weight for `symbol`, zero when absent.
    pub fn get(&self, symbol: &str) -> f64 {
        self.weights.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.weights.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.weights.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> + '_ {
        self.weights.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Copy with weights rescaled to sum to 1. Returns `self` unchanged
    /// when the sum is not positive.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return self.clone();
        }
        Self {
            weights: self
                .weights
                .iter()
                .map(|(s, w)| (s.clone(), w / total))
                .collect(),
        }
    }
}

/// Rebalance signals derived from the current portfolio state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeploySignals {
    /// Equity relative to its peak, minus one (zero or negative).
    pub drawdown: f64,
    /// Largest absolute gap between held and target weight.
    pub weight_deviation: f64,
    /// Annualised volatility of recent daily equity, if computable.
    pub realized_volatility: Option<f64>,
    pub drawdown_triggered: bool,
    pub weight_deviation_triggered: bool,
    pub volatility_triggered: bool,
    /// Fraction of pending capital allowed into the market this period.
    pub deploy_fraction: f64,
}

impl DeploySignals {
    /// Whether any trigger fired.
    pub fn is_triggered(&self) -> bool {
        self.drawdown_triggered || self.weight_deviation_triggered || self.volatility_triggered
    }
}

/// One point on the daily equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub exposure: f64,
    pub drawdown: f64,
}

/// Immutable record of one rebalance period's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub period_index: usize,
    /// Equity after this period's contribution.
    pub equity: f64,
    pub contribution: f64,
    pub target_exposure: f64,
    /// Borrowed capital; negative when part of equity is held as cash.
    pub borrow: f64,
    pub positions: Positions,
    pub weights: WeightVector,
    pub signals: DeploySignals,
    /// Whether the weights came from a fresh optimisation this period.
    pub reoptimized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_series_rejects_mismatched_lengths() {
        let err = AssetSeries::new("SPY", vec![d(1), d(2)], vec![100.0]);
        assert!(matches!(err, Err(LeverError::InvalidInput(_))));
    }

    #[test]
    fn test_series_rejects_unordered_dates() {
        assert!(AssetSeries::new("SPY", vec![d(2), d(2)], vec![1.0, 2.0]).is_err());
        assert!(AssetSeries::new("SPY", vec![d(3), d(2)], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_price_on_or_before() {
        let s = AssetSeries::new("SPY", vec![d(2), d(4), d(8)], vec![10.0, 0.0, 12.0]).unwrap();
        assert_eq!(s.price_on_or_before(d(1)), None);
        assert_eq!(s.price_on_or_before(d(3)), Some(10.0));
        // Non-positive prices are treated as missing.
        assert_eq!(s.price_on_or_before(d(5)), Some(10.0));
        assert_eq!(s.price_on_or_before(d(31)), Some(12.0));
    }

    #[test]
    fn test_window_is_inclusive() {
        let s = AssetSeries::new("QQQ", vec![d(1), d(2), d(3), d(4)], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let w = s.window(d(2), d(3));
        assert_eq!(w.prices(), &[2.0, 3.0]);
        assert_eq!(w.iter().collect::<Vec<_>>(), vec![(d(2), 2.0), (d(3), 3.0)]);
        assert!(s.window(d(5), d(9)).is_empty());
    }

    #[test]
    fn test_deploy_signals_is_triggered() {
        assert!(!DeploySignals::default().is_triggered());
        let signals = DeploySignals {
            volatility_triggered: true,
            ..Default::default()
        };
        assert!(signals.is_triggered());
    }

    #[test]
    fn test_weight_vector_helpers() {
        let w = WeightVector::equal(&["A", "B", "C", "D"]);
        assert_eq!(w.len(), 4);
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert_eq!(w.get("Z"), 0.0);

        let raw = WeightVector::from_pairs([("A", 2.0), ("B", 6.0)]);
        let n = raw.normalized();
        assert!((n.get("A") - 0.25).abs() < 1e-12);
        assert!((n.get("B") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_weight_vector_serializes_as_map() {
        let w = WeightVector::from_pairs([("TQQQ", 0.6), ("UPRO", 0.4)]);
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"TQQQ":0.6,"UPRO":0.4}"#);
    }
}
