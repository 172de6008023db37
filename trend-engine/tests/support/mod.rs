#![allow(dead_code)]

use common::{ClassifierSpec, LinearModel};
use trend_engine::regime::FEATURE_COUNT;
use trend_engine::{generate_random_walk, generate_trend_legs, BarSeries, ParameterSet, Timeframe, TrendLeg};

/// Short windows so a 50-bar series leaves room for several crossovers.
pub fn scripted_params() -> ParameterSet {
    let mut params = ParameterSet::default()
        .named("scripted")
        .with_windows(3, 8)
        .with_band(5, 1.5)
        .with_min_strength(0.0);
    params.strategy.rsi_period = 5;
    params.strategy.volatility_window = 5;
    // Wide stop keeps exits on the crossover signals
    params.risk.stop_loss_pct = 0.2;
    // Unlevered: every entry is the 1000 risk-based notional
    params.risk.leverage_tiers = vec![common::LeverageTier::new(0.0, 1.0)];
    params
}

/// 50 hourly bars: a dip, two rallies separated by a pullback, and a fade.
pub fn scripted_series() -> BarSeries {
    let legs = [
        TrendLeg::new(10, -0.5),
        TrendLeg::new(14, 1.2),
        TrendLeg::new(6, -1.0),
        TrendLeg::new(14, 1.2),
        TrendLeg::new(6, -0.6),
    ];
    BarSeries::new(
        "TEST",
        Timeframe::H1,
        generate_trend_legs(100.0, Timeframe::H1, &legs, 0.25),
    )
}

pub fn random_series(count: usize, seed: u64) -> BarSeries {
    BarSeries::new(
        "BTCUSDT",
        Timeframe::H1,
        generate_random_walk(count, 100.0, Timeframe::H1, seed),
    )
}

/// Parameter sets that differ enough to produce different results.
pub fn sweep_sets() -> Vec<ParameterSet> {
    [(5, 20), (9, 21), (12, 30), (7, 50), (3, 10), (10, 40)]
        .iter()
        .enumerate()
        .map(|(i, &(fast, slow))| {
            ParameterSet::default()
                .named(format!("set-{i}"))
                .with_windows(fast, slow)
                .with_min_strength(0.0)
        })
        .collect()
}

/// 15m base with 15m/1h/4h candidates. The classifier always answers
/// `trending` and no entry is strong enough to trade, so the selector moves
/// to 1h after two agreeing evaluations and stays there.
pub fn multi_timeframe_params(hysteresis: usize) -> ParameterSet {
    let mut params = ParameterSet::default()
        .named("multi-timeframe")
        .with_windows(3, 5)
        .with_band(3, 2.0)
        .with_min_strength(1.0)
        .with_timeframes(
            Timeframe::M15,
            vec![Timeframe::M15, Timeframe::H1, Timeframe::H4],
        )
        .with_hysteresis(hysteresis)
        .with_classifier(ClassifierSpec::Linear(LinearModel {
            weights: vec![vec![0.0; FEATURE_COUNT]; 3],
            bias: vec![1.0, 0.0, 0.0],
            min_margin: 0.0,
            adaptive: false,
        }));
    params.strategy.rsi_period = 3;
    params.strategy.volatility_window = 3;
    params
}

pub fn quarter_hour_series(count: usize, seed: u64) -> BarSeries {
    BarSeries::new(
        "BTCUSDT",
        Timeframe::M15,
        generate_random_walk(count, 100.0, Timeframe::M15, seed),
    )
}
