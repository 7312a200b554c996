//! Mean-return and covariance estimation over an aligned window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Shrunk mean returns and sample covariance for a set of symbols.
///
/// All statistics are computed over the same trailing window, so row `i`
/// of the covariance matrix lines up with `symbols[i]` and `mean_returns[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentsEstimate {
    pub symbols: Vec<String>,
    pub mean_returns: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    /// Length of the aligned window.
    pub observations: usize,
}

/// Estimate moments from per-symbol daily returns.
///
/// Symbols with fewer than `min_history` returns are dropped. The rest are
/// truncated to their most recent `min_len` points, where `min_len` is the
/// shortest qualifying series. Returns `None` when nothing qualifies or the
/// common window is too short for a sample covariance.
pub fn estimate_moments(
    returns: &BTreeMap<String, Vec<f64>>,
    shrinkage: f64,
    min_history: usize,
) -> Option<MomentsEstimate> {
    let qualifying: Vec<(&String, &Vec<f64>)> = returns
        .iter()
        .filter(|(_, r)| r.len() >= min_history)
        .collect();

    let dropped = returns.len() - qualifying.len();
    if dropped > 0 {
        debug!("Dropped {} symbols below {} return points", dropped, min_history);
    }

    let min_len = qualifying.iter().map(|(_, r)| r.len()).min()?;
    if min_len < 2 {
        return None;
    }

    let windows: Vec<&[f64]> = qualifying
        .iter()
        .map(|(_, r)| &r[r.len() - min_len..])
        .collect();
    let raw_means: Vec<f64> = windows.iter().map(|w| mean(w)).collect();

    let n = windows.len();
    let mut covariance = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let cov = windows[i]
                .iter()
                .zip(windows[j].iter())
                .map(|(x, y)| (x - raw_means[i]) * (y - raw_means[j]))
                .sum::<f64>()
                / (min_len - 1) as f64;
            covariance[i][j] = cov;
            covariance[j][i] = cov;
        }
    }

    Some(MomentsEstimate {
        symbols: qualifying.iter().map(|(s, _)| (*s).clone()).collect(),
        mean_returns: raw_means.iter().map(|m| m * shrinkage).collect(),
        covariance,
        observations: min_len,
    })
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation with an `n - 1` denominator floored at one,
/// so a single observation yields zero instead of dividing by zero.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1).max(1) as f64).sqrt()
}
