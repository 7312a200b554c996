//! Integration tests for the rebalancing engine.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use lever::backtest::{BacktestConfig, Backtester};
use lever::config::{BacktestFileConfig, EngineConfig};
use lever::data::{InMemoryPriceSource, PriceCsvConfig};
use lever::moments::estimate_moments;
use lever::optimizer::{optimize_from_moments, optimize_portfolio, OptimizerConfig};
use lever::portfolio::PortfolioState;
use lever::returns::returns_by_symbol;
use lever::signals::calculate_deploy_signals;
use lever::simulation::{simulate_daily_equity_series, SimulationRequest};
use lever::sink::{MemorySink, NullSink};
use lever::sizing::{calculate_positions, calculate_target_exposure};
use lever::types::{AssetSeries, WeightVector};
use std::collections::BTreeMap;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Create synthetic weekday closes with a trend and some noise.
fn create_synthetic_series(
    symbol: &str,
    start: NaiveDate,
    days: i64,
    daily_return: f64,
    noise: f64,
) -> AssetSeries {
    let mut dates = Vec::new();
    let mut prices = Vec::new();
    let mut price = 50.0;
    for i in 0..days {
        let day = start + Duration::days(i);
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        // Deterministic pattern in place of randomness
        let shock = ((i as f64 * 0.7).sin() * 2.0 + (i as f64 * 1.3).cos()) * 0.5 * noise;
        price *= 1.0 + daily_return + shock;
        dates.push(day);
        prices.push(price);
    }
    AssetSeries::new(symbol, dates, prices).unwrap()
}

fn three_asset_source() -> InMemoryPriceSource {
    let start = date(2019, 12, 1);
    InMemoryPriceSource::new()
        .with_series(create_synthetic_series("UPRO", start, 800, 0.0009, 0.02))
        .with_series(create_synthetic_series("TMF", start, 800, 0.0002, 0.015))
        .with_series(create_synthetic_series("GLD", start, 800, 0.0003, 0.006))
}

fn backtest_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 20_000.0,
        monthly_contribution: 1_000.0,
        start_date: date(2020, 1, 1),
        end_date: date(2021, 12, 31),
        static_weights: WeightVector::from_pairs([("UPRO", 0.5), ("TMF", 0.3), ("GLD", 0.2)]),
        dynamic_optimization: true,
        engine: EngineConfig::default(),
    }
}

#[test]
fn test_full_backtest_with_reoptimization() {
    let mut sink = MemorySink::new();
    let result = Backtester::new(backtest_config())
        .unwrap()
        .run(&three_asset_source(), &mut sink)
        .unwrap();

    assert_eq!(result.events.len(), 24);
    assert!(result.events.iter().any(|e| e.reoptimized));
    assert!(result.events[..6].iter().all(|e| !e.reoptimized));

    let config = EngineConfig::default();
    for event in result.events.iter().filter(|e| e.reoptimized) {
        assert!((event.weights.sum() - 1.0).abs() < 1e-3);
        for (_, w) in event.weights.iter() {
            assert!(w >= config.min_weight - 1e-3 && w <= config.max_weight + 1e-3);
        }
    }

    for event in &result.events {
        assert!(event.target_exposure >= 0.0);
        assert!(event.target_exposure <= (event.equity * config.leverage).max(0.0) + 1e-6);
        assert!(event.signals.deploy_fraction >= 0.0);
        assert!(event.signals.deploy_fraction <= config.gradual_deploy_factor);
    }

    assert!((result.metrics.total_contributed - 43_000.0).abs() < 1e-6);
    assert_eq!(result.metrics.rebalances, 24);
    assert_eq!(sink.daily, result.daily_series);
    assert_eq!(sink.metrics.as_ref(), Some(&result.metrics));
}

#[test]
fn test_peak_equity_never_decreases() {
    let result = Backtester::new(backtest_config())
        .unwrap()
        .run(&three_asset_source(), &mut NullSink)
        .unwrap();

    let mut peak = f64::MIN;
    for point in &result.daily_series {
        let implied_peak = if point.drawdown < 0.0 {
            point.equity / (1.0 + point.drawdown)
        } else {
            point.equity
        };
        assert!(implied_peak >= peak - 1e-6);
        peak = peak.max(implied_peak);
    }
}

#[test]
fn test_backtest_from_toml_and_csv_files() {
    let dir = tempfile::tempdir().unwrap();
    let source = three_asset_source();
    for symbol in ["UPRO", "TMF", "GLD"] {
        let series = source.get(symbol).unwrap();
        let mut csv = String::from("Date,Close\n");
        for (d, p) in series.iter() {
            csv.push_str(&format!("{},{}\n", d.format("%Y-%m-%d"), p));
        }
        std::fs::write(dir.path().join(format!("{}.csv", symbol)), csv).unwrap();
    }
    let config_path = dir.path().join("backtest.toml");
    std::fs::write(&config_path, BacktestFileConfig::example()).unwrap();

    let mut file_config = BacktestFileConfig::load(&config_path).unwrap();
    file_config.backtest.start_date = Some("2020-01-01".to_string());
    file_config.backtest.end_date = Some("2020-12-31".to_string());
    let config = file_config.to_backtest_config().unwrap();

    let prices =
        InMemoryPriceSource::from_dir(dir.path(), "*.csv", &PriceCsvConfig::default()).unwrap();
    let result = Backtester::new(config).unwrap().run(&prices, &mut NullSink).unwrap();

    assert_eq!(result.events.len(), 12);
    assert!(result.metrics.final_equity > 0.0);

    let out = dir.path().join("result.json");
    result.save_json(&out).unwrap();
    assert!(std::fs::metadata(&out).unwrap().len() > 0);
}

#[test]
fn test_moments_to_optimizer_pipeline() {
    let source = three_asset_source();
    let history: BTreeMap<String, Vec<f64>> = ["UPRO", "TMF", "GLD"]
        .iter()
        .map(|s| (s.to_string(), source.get(s).unwrap().prices()[..200].to_vec()))
        .collect();
    let returns = returns_by_symbol(&history);
    let estimate = estimate_moments(&returns, 0.5, 30).unwrap();
    assert_eq!(estimate.observations, 199);

    let config = OptimizerConfig::from(&EngineConfig::default());
    let result = optimize_from_moments(&estimate, &config).unwrap();
    assert!(result.is_feasible());
    assert!((result.weights.sum() - 1.0).abs() < 1e-3);
}

#[test]
fn test_optimizer_scenario_two_assets() {
    let symbols = vec!["A".to_string(), "B".to_string()];
    let config = OptimizerConfig {
        leverage: 2.0,
        risk_free_rate: 0.02,
        min_weight: 0.05,
        max_weight: 0.95,
        trading_days: 252.0,
    };
    let result = optimize_portfolio(
        &symbols,
        &[0.0010, 0.0005],
        &[vec![0.0004, 0.0], vec![0.0, 0.0001]],
        &config,
    )
    .unwrap();
    assert!(result.sharpe_ratio > 0.0);
    assert!(result.weights.get("A") >= 0.05 - 1e-3);
    assert!(result.weights.get("B") <= 0.95 + 1e-3);
}

#[test]
fn test_single_period_pipeline_by_hand() {
    let config = EngineConfig::default();
    let weights = WeightVector::from_pairs([("UPRO", 0.5), ("TMF", 0.5)]);
    let source = three_asset_source();
    let day = date(2020, 3, 2);

    let prices: BTreeMap<String, f64> = ["UPRO", "TMF"]
        .iter()
        .map(|s| (s.to_string(), source.get(s).unwrap().price_on_or_before(day).unwrap()))
        .collect();

    let state = PortfolioState::new(10_000.0);
    let signals = calculate_deploy_signals(&state, &weights, &config);
    let target = calculate_target_exposure(state.equity, state.exposure, 0.0, signals.deploy_fraction, &config);
    assert_eq!(target, 10_000.0);

    let positions = calculate_positions(target, &weights, &prices);
    let state = state.with_rebalance(positions, 0.0);
    assert!((state.exposure - 10_000.0).abs() < 1e-6);
    assert!(state.borrow.abs() < 1e-6);

    let series: BTreeMap<String, AssetSeries> = ["UPRO", "TMF"]
        .iter()
        .map(|s| (s.to_string(), source.get(s).unwrap().clone()))
        .collect();
    let positions = state.positions.clone();
    let request = SimulationRequest {
        positions: &positions,
        borrow: state.borrow,
        price_series: &series,
        period_start: day,
        period_end: date(2020, 3, 31),
        fallback_exposure: state.exposure,
        fallback_equity: state.equity,
    };
    let outcome = simulate_daily_equity_series(&state, &request);
    assert_eq!(outcome.daily_series.first().unwrap().date, day);
    assert_eq!(outcome.daily_series.last().unwrap().date, date(2020, 3, 31));
    assert!((outcome.daily_series[0].equity - 10_000.0).abs() < 1e-6);

    let state = state.advance(&outcome);
    assert_eq!(state.daily_equity_history.len(), outcome.daily_series.len());
    assert!(state.peak_equity >= 10_000.0);
}
