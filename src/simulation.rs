//! Daily mark-to-market of held positions between rebalance dates.

use crate::portfolio::PortfolioState;
use crate::types::{AssetSeries, EquityPoint, Positions};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Inputs for simulating one period.
#[derive(Debug, Clone, Copy)]
pub struct SimulationRequest<'a> {
    pub positions: &'a Positions,
    /// Borrowed capital, constant over the period.
    pub borrow: f64,
    pub price_series: &'a BTreeMap<String, AssetSeries>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Exposure reported when no day in the period can be priced.
    pub fallback_exposure: f64,
    /// Equity reported when no day in the period can be priced.
    pub fallback_equity: f64,
}

/// Result of simulating one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub last_exposure: f64,
    pub last_equity: f64,
    /// Running peak equity at the end of the period.
    pub peak_equity: f64,
    /// Never empty.
    pub daily_series: Vec<EquityPoint>,
    /// Last known price of every held symbol that was priced.
    pub last_prices: BTreeMap<String, f64>,
}

/// Forward-only cursor yielding the latest price on or before a date.
struct PriceCursor<'a> {
    series: &'a AssetSeries,
    next: usize,
    last: Option<f64>,
}

impl<'a> PriceCursor<'a> {
    fn new(series: &'a AssetSeries) -> Self {
        Self {
            series,
            next: 0,
            last: None,
        }
    }

    fn advance_to(&mut self, date: NaiveDate) -> Option<f64> {
        let dates = self.series.dates();
        let prices = self.series.prices();
        while self.next < dates.len() && dates[self.next] <= date {
            let price = prices[self.next];
            if price.is_finite() && price > 0.0 {
                self.last = Some(price);
            }
            self.next += 1;
        }
        self.last
    }
}

/// Walk every trading day in `[period_start, period_end]`, valuing held
/// positions at the last known price.
///
/// Trading days are the union of the held symbols' dates in the window
/// plus both endpoints. A day with no priced symbol is skipped. If no day
/// can be priced, a single point at `period_end` built from the fallback
/// values is emitted instead, so the series is never empty.
pub fn simulate_daily_equity_series(
    state: &PortfolioState,
    request: &SimulationRequest<'_>,
) -> SimulationOutcome {
    let held: Vec<(&str, f64)> = request
        .positions
        .iter()
        .filter(|(_, p)| p.quantity != 0.0)
        .map(|(s, p)| (s.as_str(), p.quantity))
        .collect();

    let mut cursors: Vec<(&str, f64, PriceCursor<'_>)> = held
        .iter()
        .filter_map(|(symbol, qty)| {
            request
                .price_series
                .get(*symbol)
                .map(|series| (*symbol, *qty, PriceCursor::new(series)))
        })
        .collect();

    let mut dates = BTreeSet::new();
    if request.period_start <= request.period_end {
        dates.insert(request.period_start);
        dates.insert(request.period_end);
        for (_, _, cursor) in &cursors {
            dates.extend(
                cursor
                    .series
                    .dates()
                    .iter()
                    .filter(|d| **d >= request.period_start && **d <= request.period_end),
            );
        }
    }

    let mut peak = state.peak_equity;
    let mut series = Vec::with_capacity(dates.len());
    let mut last_prices = BTreeMap::new();

    for date in dates {
        let mut exposure = 0.0;
        let mut priced = false;
        for (symbol, qty, cursor) in cursors.iter_mut() {
            if let Some(price) = cursor.advance_to(date) {
                exposure += *qty * price;
                priced = true;
                last_prices.insert(symbol.to_string(), price);
            }
        }
        if !priced {
            continue;
        }
        let equity = exposure - request.borrow;
        series.push(record_point(date, equity, exposure, &mut peak));
    }

    if series.is_empty() {
        debug!(
            "No priced day between {} and {}, using fallback equity {:.2}",
            request.period_start, request.period_end, request.fallback_equity
        );
        series.push(record_point(
            request.period_end,
            request.fallback_equity,
            request.fallback_exposure,
            &mut peak,
        ));
    }

    let last = series[series.len() - 1];
    SimulationOutcome {
        last_exposure: last.exposure,
        last_equity: last.equity,
        peak_equity: peak,
        daily_series: series,
        last_prices,
    }
}

/// Build a point and raise the running peak. Drawdown is measured against
/// the peak before this day, so a new high reports a positive value; it is
/// zero while no positive peak existed before.
fn record_point(date: NaiveDate, equity: f64, exposure: f64, peak: &mut f64) -> EquityPoint {
    let previous_peak = *peak;
    *peak = peak.max(equity);
    let drawdown = if previous_peak > 0.0 {
        equity / previous_peak - 1.0
    } else {
        0.0
    };
    EquityPoint {
        date,
        equity,
        exposure,
        drawdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn series(symbol: &str, points: &[(u32, f64)]) -> AssetSeries {
        AssetSeries::new(
            symbol,
            points.iter().map(|(day, _)| d(*day)).collect(),
            points.iter().map(|(_, p)| *p).collect(),
        )
        .unwrap()
    }

    fn positions(items: &[(&str, f64, f64)]) -> Positions {
        items
            .iter()
            .map(|(s, q, price)| {
                (
                    s.to_string(),
                    Position {
                        quantity: *q,
                        value: q * price,
                    },
                )
            })
            .collect()
    }

    fn request<'a>(
        positions: &'a Positions,
        prices: &'a BTreeMap<String, AssetSeries>,
        borrow: f64,
        start: u32,
        end: u32,
    ) -> SimulationRequest<'a> {
        SimulationRequest {
            positions,
            borrow,
            price_series: prices,
            period_start: d(start),
            period_end: d(end),
            fallback_exposure: 1_500.0,
            fallback_equity: 500.0,
        }
    }

    #[test]
    fn test_marks_to_market_with_borrow() {
        let pos = positions(&[("A", 10.0, 100.0)]);
        let prices: BTreeMap<_, _> = [(
            "A".to_string(),
            series("A", &[(1, 100.0), (2, 110.0), (3, 90.0)]),
        )]
        .into_iter()
        .collect();
        let state = PortfolioState {
            peak_equity: 500.0,
            ..PortfolioState::new(500.0)
        };

        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 500.0, 1, 3));
        let equity: Vec<f64> = out.daily_series.iter().map(|p| p.equity).collect();
        assert_eq!(equity, vec![500.0, 600.0, 400.0]);
        assert_eq!(out.peak_equity, 600.0);
        assert_eq!(out.last_equity, 400.0);
        assert_eq!(out.last_exposure, 900.0);
        assert_eq!(out.daily_series[0].drawdown, 0.0);
        assert!((out.daily_series[1].drawdown - 0.2).abs() < 1e-12);
        assert!((out.daily_series[2].drawdown - (400.0 / 600.0 - 1.0)).abs() < 1e-12);
        assert_eq!(out.last_prices["A"], 90.0);
    }

    #[test]
    fn test_new_high_drawdown_uses_prior_peak() {
        let pos = positions(&[("A", 10.0, 100.0)]);
        let prices: BTreeMap<_, _> = [("A".to_string(), series("A", &[(1, 100.0), (2, 120.0)]))]
            .into_iter()
            .collect();
        let state = PortfolioState::new(1_000.0);

        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 1, 2));
        let drawdowns: Vec<f64> = out.daily_series.iter().map(|p| p.drawdown).collect();
        assert_eq!(drawdowns[0], 0.0);
        assert!((drawdowns[1] - 0.2).abs() < 1e-12);
        assert_eq!(out.peak_equity, 1_200.0);
    }

    #[test]
    fn test_no_prior_peak_reports_zero_drawdown() {
        let pos = positions(&[("A", 1.0, 10.0)]);
        let prices: BTreeMap<_, _> = [("A".to_string(), series("A", &[(1, 10.0), (2, 12.0)]))]
            .into_iter()
            .collect();
        let state = PortfolioState::new(0.0);

        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 1, 2));
        assert_eq!(out.daily_series[0].drawdown, 0.0);
        assert!((out.daily_series[1].drawdown - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_carries_prices_forward_across_gaps() {
        let pos = positions(&[("A", 1.0, 10.0), ("B", 1.0, 20.0)]);
        let prices: BTreeMap<_, _> = [
            ("A".to_string(), series("A", &[(1, 10.0), (3, 12.0)])),
            ("B".to_string(), series("B", &[(2, 20.0), (4, 22.0)])),
        ]
        .into_iter()
        .collect();
        let state = PortfolioState::new(30.0);

        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 1, 5));
        let dates: Vec<NaiveDate> = out.daily_series.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d(1), d(2), d(3), d(4), d(5)]);
        let exposure: Vec<f64> = out.daily_series.iter().map(|p| p.exposure).collect();
        // Day 1 only A is known; day 5 is the endpoint with both carried.
        assert_eq!(exposure, vec![10.0, 30.0, 32.0, 34.0, 34.0]);
    }

    #[test]
    fn test_uses_price_from_before_period() {
        let pos = positions(&[("A", 2.0, 50.0)]);
        let prices: BTreeMap<_, _> = [("A".to_string(), series("A", &[(1, 50.0), (9, 55.0)]))]
            .into_iter()
            .collect();
        let state = PortfolioState::new(100.0);
        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 5, 6));
        assert_eq!(out.daily_series.len(), 2);
        assert!(out.daily_series.iter().all(|p| p.equity == 100.0));
    }

    #[test]
    fn test_fallback_point_when_nothing_priced() {
        let pos = positions(&[("A", 1.0, 10.0)]);
        let prices = BTreeMap::new();
        let state = PortfolioState::new(500.0);
        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 1, 3));
        assert_eq!(out.daily_series.len(), 1);
        assert_eq!(out.daily_series[0].date, d(3));
        assert_eq!(out.last_equity, 500.0);
        assert_eq!(out.last_exposure, 1_500.0);
        assert!(out.last_prices.is_empty());
    }

    #[test]
    fn test_fallback_when_window_inverted() {
        let pos = Positions::new();
        let prices = BTreeMap::new();
        let state = PortfolioState::new(500.0);
        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 9, 3));
        assert_eq!(out.daily_series.len(), 1);
    }

    #[test]
    fn test_skips_invalid_prices() {
        let pos = positions(&[("A", 1.0, 10.0)]);
        let prices: BTreeMap<_, _> = [(
            "A".to_string(),
            series("A", &[(1, 10.0), (2, -1.0), (3, 11.0)]),
        )]
        .into_iter()
        .collect();
        let state = PortfolioState::new(10.0);
        let out = simulate_daily_equity_series(&state, &request(&pos, &prices, 0.0, 1, 3));
        let exposure: Vec<f64> = out.daily_series.iter().map(|p| p.exposure).collect();
        assert_eq!(exposure, vec![10.0, 10.0, 11.0]);
    }
}
