//! Deploy and rebalance signals.
//!
//! A drawdown breach takes priority: when it fires, the weight-deviation
//! and volatility checks are not evaluated. Those two may fire together.

use crate::config::EngineConfig;
use crate::moments::sample_std;
use crate::portfolio::PortfolioState;
use crate::returns::log_returns;
use crate::types::{DeploySignals, WeightVector};

/// Equity relative to peak minus one; zero without a positive peak.
pub fn drawdown(equity: f64, peak_equity: f64) -> f64 {
    if peak_equity > 0.0 {
        equity / peak_equity - 1.0
    } else {
        0.0
    }
}

/// Largest absolute gap between held and target weights.
///
/// Held symbols missing from `target` count as target weight zero.
pub fn weight_deviation(state: &PortfolioState, target: &WeightVector) -> f64 {
    if state.exposure <= 0.0 {
        return 0.0;
    }
    state
        .positions
        .iter()
        .map(|(symbol, p)| (p.value / state.exposure - target.get(symbol)).abs())
        .fold(0.0, f64::max)
}

/// Annualised volatility of the trailing `lookback_days` equity returns.
///
/// `None` when fewer than two usable equity points exist.
pub fn realized_volatility(equity: &[f64], lookback_days: usize, trading_days: f64) -> Option<f64> {
    let take = (lookback_days + 1).min(equity.len());
    let returns = log_returns(&equity[equity.len() - take..]);
    if returns.is_empty() {
        return None;
    }
    Some(sample_std(&returns) * trading_days.sqrt())
}

/// Score the current state against the target weights.
pub fn calculate_deploy_signals(
    state: &PortfolioState,
    target_weights: &WeightVector,
    config: &EngineConfig,
) -> DeploySignals {
    let mut signals = DeploySignals {
        drawdown: drawdown(state.equity, state.peak_equity),
        weight_deviation: weight_deviation(state, target_weights),
        realized_volatility: realized_volatility(
            &state.equity_values(),
            config.volatility_lookback_days,
            config.trading_days(),
        ),
        ..Default::default()
    };

    let mut deploy_fraction: f64 = 0.0;
    if signals.drawdown <= -config.drawdown_redeploy_threshold {
        deploy_fraction = 1.0;
        signals.drawdown_triggered = true;
    } else {
        if signals.weight_deviation >= config.weight_deviation_threshold {
            deploy_fraction = 1.0;
            signals.weight_deviation_triggered = true;
        }
        if let Some(vol) = signals.realized_volatility {
            if vol <= config.volatility_redeploy_threshold {
                deploy_fraction = 1.0;
                signals.volatility_triggered = true;
            }
        }
    }

    signals.deploy_fraction = if deploy_fraction > 0.0 {
        deploy_fraction.min(config.gradual_deploy_factor)
    } else {
        0.0
    };
    signals
}
