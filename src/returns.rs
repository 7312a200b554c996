//! Log-return series construction.

use std::collections::BTreeMap;

/// Log returns `ln(p[i] / p[i-1])` of an ordered price sequence.
///
/// Pairs where either price is non-positive or not finite are skipped,
/// never zero-filled, so the output can be shorter than `prices.len() - 1`.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| is_usable(w[0]) && is_usable(w[1]))
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Log returns for every symbol of a price history map.
pub fn returns_by_symbol(history: &BTreeMap<String, Vec<f64>>) -> BTreeMap<String, Vec<f64>> {
    history
        .iter()
        .map(|(symbol, prices)| (symbol.clone(), log_returns(prices)))
        .collect()
}

fn is_usable(price: f64) -> bool {
    price.is_finite() && price > 0.0
}
