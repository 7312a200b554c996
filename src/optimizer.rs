//! Leverage-adjusted maximum Sharpe ratio optimisation.
//!
//! Weights are searched with a deterministic Nelder-Mead simplex. The weight
//! band is enforced inside the objective (out-of-band points score `+inf`),
//! followed by a repair pass on the winning vertex.
//!
//! # Example
//!
//! ```
//! use lever::optimizer::{optimize_portfolio, OptimizerConfig};
//!
//! let symbols = vec!["UPRO".to_string(), "TMF".to_string()];
//! let means = vec![0.0010, 0.0005];
//! let cov = vec![vec![0.0004, 0.0], vec![0.0, 0.0001]];
//! let config = OptimizerConfig {
//!     leverage: 2.0,
//!     risk_free_rate: 0.02,
//!     min_weight: 0.05,
//!     max_weight: 0.95,
//!     trading_days: 252.0,
//! };
//!
//! let result = optimize_portfolio(&symbols, &means, &cov, &config).unwrap();
//! assert!(result.is_feasible());
//! assert!(result.sharpe_ratio > 0.0);
//! ```

use crate::config::EngineConfig;
use crate::error::{LeverError, Result};
use crate::moments::MomentsEstimate;
use crate::types::WeightVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-8;
const INITIAL_STEP: f64 = 0.05;
const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const POINT_MIN: f64 = 0.01;
const POINT_MAX: f64 = 0.99;
const BAND_EPSILON: f64 = 1e-6;
const REPAIR_PASSES: usize = 20;

/// Inputs of the Sharpe objective besides the return statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub leverage: f64,
    pub risk_free_rate: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    pub trading_days: f64,
}

impl From<&EngineConfig> for OptimizerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            leverage: config.leverage,
            risk_free_rate: config.risk_free_rate,
            min_weight: config.min_weight,
            max_weight: config.max_weight,
            trading_days: config.trading_days(),
        }
    }
}

/// Outcome of an optimisation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: WeightVector,
    /// Leveraged Sharpe ratio of the best vertex (`-inf` when infeasible).
    pub sharpe_ratio: f64,
    /// Objective value of the best vertex.
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl OptimizationResult {
    /// False when every vertex violated the weight band. The weights are
    /// then only the least-bad candidate and callers should fall back.
    pub fn is_feasible(&self) -> bool {
        self.objective.is_finite()
    }
}

/// Annualised Sharpe ratio of a leveraged portfolio.
///
/// `weights` are rescaled to sum to one first. Returns `None` when the
/// weights sum to zero or the leveraged volatility is not positive.
pub fn leveraged_sharpe(
    weights: &[f64],
    mean_returns: &[f64],
    covariance: &[Vec<f64>],
    config: &OptimizerConfig,
) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let w: Vec<f64> = weights.iter().map(|x| x / total).collect();

    let mean: f64 = w.iter().zip(mean_returns).map(|(wi, mi)| wi * mi).sum();
    let mut variance = 0.0;
    for (i, wi) in w.iter().enumerate() {
        for (j, wj) in w.iter().enumerate() {
            variance += wi * wj * covariance[i][j];
        }
    }

    let annual_return = mean * config.trading_days * config.leverage;
    let annual_vol = variance.max(0.0).sqrt() * config.trading_days.sqrt() * config.leverage;
    if annual_vol <= 0.0 || !annual_vol.is_finite() {
        return None;
    }
    Some((annual_return - config.risk_free_rate) / annual_vol)
}

struct Problem<'a> {
    mean_returns: &'a [f64],
    covariance: &'a [Vec<f64>],
    config: &'a OptimizerConfig,
}

impl Problem<'_> {
    /// Negative leveraged Sharpe, or `+inf` outside the weight band.
    fn value(&self, point: &[f64]) -> f64 {
        let total: f64 = point.iter().sum();
        if total <= 0.0 {
            return f64::INFINITY;
        }
        let lo = self.config.min_weight - BAND_EPSILON;
        let hi = self.config.max_weight + BAND_EPSILON;
        if point.iter().any(|x| {
            let w = x / total;
            w < lo || w > hi
        }) {
            return f64::INFINITY;
        }
        match leveraged_sharpe(point, self.mean_returns, self.covariance, self.config) {
            Some(sharpe) if sharpe.is_finite() => -sharpe,
            _ => f64::INFINITY,
        }
    }
}

/// A candidate point and its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub point: Vec<f64>,
    pub value: f64,
}

/// Nelder-Mead simplex of `n + 1` vertices, always sorted by ascending value.
///
/// Every transition returns a new simplex; the ordering is re-established
/// on construction so `best()` and `worst()` are always meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplex {
    vertices: Vec<Vertex>,
}

impl Simplex {
    fn from_vertices(mut vertices: Vec<Vertex>) -> Self {
        vertices.sort_by(|a, b| a.value.total_cmp(&b.value));
        Self { vertices }
    }

    /// Evaluate `points` with `f` and sort.
    pub fn new(points: Vec<Vec<f64>>, f: impl Fn(&[f64]) -> f64) -> Self {
        Self::from_vertices(
            points
                .into_iter()
                .map(|point| {
                    let value = f(&point);
                    Vertex { point, value }
                })
                .collect(),
        )
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn best(&self) -> &Vertex {
        &self.vertices[0]
    }

    pub fn worst(&self) -> &Vertex {
        &self.vertices[self.vertices.len() - 1]
    }

    fn second_worst(&self) -> &Vertex {
        &self.vertices[self.vertices.len().saturating_sub(2)]
    }

    /// Value gap between worst and best. `NaN` when both are infinite,
    /// which never satisfies a convergence check.
    pub fn spread(&self) -> f64 {
        self.worst().value - self.best().value
    }

    /// Centroid of every vertex except the worst.
    pub fn centroid(&self) -> Vec<f64> {
        let keep = &self.vertices[..self.vertices.len() - 1];
        let dim = self.best().point.len();
        let mut c = vec![0.0; dim];
        for v in keep {
            for (ci, xi) in c.iter_mut().zip(&v.point) {
                *ci += xi;
            }
        }
        let n = keep.len().max(1) as f64;
        c.iter_mut().for_each(|ci| *ci /= n);
        c
    }

    /// Copy with the worst vertex swapped for `vertex`.
    pub fn replace_worst(&self, vertex: Vertex) -> Self {
        let mut vertices = self.vertices.clone();
        let last = vertices.len() - 1;
        vertices[last] = vertex;
        Self::from_vertices(vertices)
    }

    /// Pull every vertex toward the best one by `sigma` and re-evaluate.
    pub fn shrink(&self, sigma: f64, f: impl Fn(&[f64]) -> f64) -> Self {
        let best = self.best().clone();
        let mut vertices = vec![best.clone()];
        for v in &self.vertices[1..] {
            let point: Vec<f64> = best
                .point
                .iter()
                .zip(&v.point)
                .map(|(b, x)| b + sigma * (x - b))
                .collect();
            let value = f(&point);
            vertices.push(Vertex { point, value });
        }
        Self::from_vertices(vertices)
    }

    /// One reflect / expand / contract / shrink iteration.
    pub fn step(&self, f: impl Fn(&[f64]) -> f64) -> Self {
        let centroid = self.centroid();
        let worst = self.worst();

        let reflected_point = clamp_point(along(&centroid, &worst.point, -REFLECTION));
        let reflected = Vertex {
            value: f(&reflected_point),
            point: reflected_point,
        };

        if reflected.value < self.best().value {
            let expanded_point = clamp_point(along(&centroid, &reflected.point, EXPANSION));
            let expanded = Vertex {
                value: f(&expanded_point),
                point: expanded_point,
            };
            return if expanded.value < reflected.value {
                self.replace_worst(expanded)
            } else {
                self.replace_worst(reflected)
            };
        }

        if reflected.value < self.second_worst().value {
            return self.replace_worst(reflected);
        }

        let contracted_point = along(&centroid, &worst.point, CONTRACTION);
        let contracted_value = f(&contracted_point);
        if contracted_value < worst.value {
            return self.replace_worst(Vertex {
                point: contracted_point,
                value: contracted_value,
            });
        }

        self.shrink(SHRINK, f)
    }
}

/// `origin + coef * (toward - origin)`.
fn along(origin: &[f64], toward: &[f64], coef: f64) -> Vec<f64> {
    origin
        .iter()
        .zip(toward)
        .map(|(o, t)| o + coef * (t - o))
        .collect()
}

fn clamp_point(point: Vec<f64>) -> Vec<f64> {
    point
        .into_iter()
        .map(|x| x.clamp(POINT_MIN, POINT_MAX))
        .collect()
}

fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    }
}

/// Starting simplex: equal weights plus one vertex per dimension bumped
/// by `INITIAL_STEP` (capped at `max_weight`) and renormalised.
fn initial_points(n: usize, max_weight: f64) -> Vec<Vec<f64>> {
    let base = vec![1.0 / n as f64; n];
    let mut points = vec![base.clone()];
    for i in 0..n {
        let mut p = base.clone();
        p[i] = (p[i] + INITIAL_STEP).min(max_weight);
        normalize(&mut p);
        points.push(p);
    }
    points
}

/// Clip weights into `[min_weight, max_weight]` and spread the clipped
/// excess (or deficit) evenly over weights strictly inside the band.
pub(crate) fn repair_weights(mut weights: Vec<f64>, min_weight: f64, max_weight: f64) -> Vec<f64> {
    normalize(&mut weights);
    for _ in 0..REPAIR_PASSES {
        let mut excess = 0.0;
        let mut violated = false;
        for w in weights.iter_mut() {
            if *w > max_weight {
                excess += *w - max_weight;
                *w = max_weight;
                violated = true;
            } else if *w < min_weight {
                excess += *w - min_weight;
                *w = min_weight;
                violated = true;
            }
        }
        if !violated {
            break;
        }
        let free: Vec<usize> = (0..weights.len())
            .filter(|&i| weights[i] > min_weight && weights[i] < max_weight)
            .collect();
        if free.is_empty() {
            continue;
        }
        let share = excess / free.len() as f64;
        for i in free {
            weights[i] += share;
        }
    }
    normalize(&mut weights);
    weights
        .into_iter()
        .map(|w| (w * 10_000.0).round() / 10_000.0)
        .collect()
}

/// Find weights maximising the leveraged Sharpe ratio within the band.
///
/// Deterministic: identical inputs always produce identical results. Only
/// structurally malformed inputs are rejected; an unsatisfiable band yields
/// an infeasible result (see [`OptimizationResult::is_feasible`]).
pub fn optimize_portfolio(
    symbols: &[String],
    mean_returns: &[f64],
    covariance: &[Vec<f64>],
    config: &OptimizerConfig,
) -> Result<OptimizationResult> {
    let n = symbols.len();
    if n == 0 {
        return Err(LeverError::InvalidInput(
            "Need at least one symbol".to_string(),
        ));
    }
    if mean_returns.len() != n {
        return Err(LeverError::InvalidInput(
            "Mean returns length must match number of symbols".to_string(),
        ));
    }
    if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
        return Err(LeverError::InvalidInput(
            "Covariance matrix must be square and match number of symbols".to_string(),
        ));
    }

    let problem = Problem {
        mean_returns,
        covariance,
        config,
    };
    let objective = |p: &[f64]| problem.value(p);

    let mut simplex = Simplex::new(initial_points(n, config.max_weight), objective);
    let mut iterations = 0;
    let mut converged = false;
    while iterations < MAX_ITERATIONS {
        if simplex.spread() < TOLERANCE {
            converged = true;
            break;
        }
        simplex = simplex.step(objective);
        iterations += 1;
    }

    let best = simplex.best();
    let weights = repair_weights(best.point.clone(), config.min_weight, config.max_weight);
    let result = OptimizationResult {
        weights: WeightVector::from_pairs(symbols.iter().cloned().zip(weights)),
        sharpe_ratio: -best.value,
        objective: best.value,
        iterations,
        converged,
    };

    if result.is_feasible() {
        debug!(
            "Optimizer finished after {} iterations (converged: {}), sharpe {:.4}",
            iterations, converged, result.sharpe_ratio
        );
    } else {
        warn!(
            "No feasible allocation in weight band [{}, {}] for {} symbols",
            config.min_weight, config.max_weight, n
        );
    }
    Ok(result)
}

/// Run [`optimize_portfolio`] on a moment estimate.
pub fn optimize_from_moments(
    estimate: &MomentsEstimate,
    config: &OptimizerConfig,
) -> Result<OptimizationResult> {
    optimize_portfolio(
        &estimate.symbols,
        &estimate.mean_returns,
        &estimate.covariance,
        config,
    )
}
