//! Target exposure sizing and position allocation.
//!
//! Exposure behaves as a ratchet: it is capped at `equity * leverage`,
//! floored at `equity * min_leverage`, and only rises through the floor or
//! through signalled deployment of pending contributions. Nothing here
//! reduces exposure on its own.

use crate::config::EngineConfig;
use crate::types::{Position, Positions, WeightVector};
use std::collections::BTreeMap;
use tracing::debug;

/// Exposure to hold after this period's decision.
///
/// A pending contribution that no signal deploys is held as unleveraged
/// equity, provided exposure already meets the floor implied by the
/// equity before that contribution.
pub fn calculate_target_exposure(
    new_equity: f64,
    current_exposure: f64,
    pending_contribution: f64,
    deploy_fraction: f64,
    config: &EngineConfig,
) -> f64 {
    let desired = new_equity * config.leverage;
    let min_exposure = new_equity * config.min_leverage;

    let previous_equity = (new_equity - pending_contribution).max(0.0);
    let previous_min_exposure = previous_equity * config.min_leverage;

    let holding_contributions = pending_contribution > 0.0
        && deploy_fraction == 0.0
        && current_exposure >= previous_min_exposure;

    let mut target = current_exposure;
    if !holding_contributions && target < min_exposure {
        target = min_exposure;
    }

    if deploy_fraction > 0.0 && pending_contribution > 0.0 {
        let allowed = desired
            .min(current_exposure + pending_contribution * config.leverage * deploy_fraction);
        target = target.max(allowed);
    }

    let target = target.min(desired).max(0.0);
    debug!(
        "Target exposure {:.2} (current {:.2}, desired {:.2}, holding: {})",
        target, current_exposure, desired, holding_contributions
    );
    target
}

/// Split `target_exposure` across symbols by weight.
///
/// Symbols with zero weight or without a positive price get no position.
pub fn calculate_positions(
    target_exposure: f64,
    weights: &WeightVector,
    prices: &BTreeMap<String, f64>,
) -> Positions {
    weights
        .iter()
        .filter(|(_, w)| *w > 0.0)
        .filter_map(|(symbol, w)| {
            let price = prices.get(symbol).copied().filter(|p| *p > 0.0)?;
            let value = target_exposure * w;
            Some((
                symbol.to_string(),
                Position {
                    quantity: value / price,
                    value,
                },
            ))
        })
        .collect()
}
