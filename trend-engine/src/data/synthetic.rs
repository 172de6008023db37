use chrono::{DateTime, Utc};
use common::{Bar, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Open time of the first synthetic bar.
pub fn synthetic_start() -> DateTime<Utc> {
    // 2024-01-01T00:00:00Z
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

/// Seeded random walk; the same seed always yields the same bars.
pub fn generate_random_walk(
    count: usize,
    initial_price: f64,
    timeframe: Timeframe,
    seed: u64,
) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(count);
    let start = synthetic_start();

    let volatility = 0.01;
    let drift = 0.0002;
    let mut price = initial_price;

    for i in 0..count {
        let timestamp = start + timeframe.duration() * i as i32;

        let ret = drift + volatility * rng.gen_range(-1.0..1.0);
        let open = price;
        let close = (price * (1.0 + ret)).max(0.01);

        let range = open * rng.gen_range(0.001..0.01);
        let high = open.max(close) + rng.gen_range(0.0..range);
        let low = (open.min(close) - rng.gen_range(0.0..range)).max(0.005);

        // Busier on larger moves
        let volume = 1_000.0 * (1.0 + ret.abs() * 50.0) * rng.gen_range(0.8..1.2);

        bars.push(Bar::new(timestamp, open, high, low, close, volume));
        price = close;
    }

    bars
}

/// A straight price leg: `bars` bars moving by `step` per bar.
#[derive(Debug, Clone, Copy)]
pub struct TrendLeg {
    pub bars: usize,
    pub step: f64,
}

impl TrendLeg {
    pub fn new(bars: usize, step: f64) -> Self {
        Self { bars, step }
    }
}

/// Scripted series built from consecutive legs. Each bar opens at the prior
/// close and its high/low extend `wick` beyond the body.
pub fn generate_trend_legs(
    initial_price: f64,
    timeframe: Timeframe,
    legs: &[TrendLeg],
    wick: f64,
) -> Vec<Bar> {
    let total: usize = legs.iter().map(|leg| leg.bars).sum();
    let mut bars = Vec::with_capacity(total);
    let start = synthetic_start();
    let mut price = initial_price;

    for leg in legs {
        for _ in 0..leg.bars {
            let timestamp = start + timeframe.duration() * bars.len() as i32;
            let open = price;
            let close = price + leg.step;
            let high = open.max(close) + wick;
            let low = open.min(close) - wick;
            bars.push(Bar::new(timestamp, open, high, low, close, 1_000.0));
            price = close;
        }
    }

    bars
}
