pub mod atr;
pub mod band;
pub mod rsi;
pub mod sma;
pub mod volatility;

pub use atr::{calculate_atr, calculate_true_range, true_range, AverageTrueRange};
pub use band::{calculate_trend_band, BandDirection, BandState, TrendBand};
pub use rsi::{calculate_rsi, RollingRsi};
pub use sma::{calculate_sma, RollingMean};
pub use volatility::{calculate_volatility, ReturnVolatility};

use chrono::{DateTime, Utc};
use common::{BacktestError, Bar, Result, StrategyParams};
use serde::{Deserialize, Serialize};

/// Fast MA position relative to the slow MA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaRelation {
    Above,
    Below,
    /// Within epsilon of each other; never counts as a cross.
    Tied,
}

impl MaRelation {
    /// Classify the MA spread. `epsilon` is relative to the slow MA, so the
    /// tie zone scales with price.
    pub fn of(fast: f64, slow: f64, epsilon: f64) -> Self {
        let diff = fast - slow;
        if diff.abs() <= epsilon * slow.abs() {
            MaRelation::Tied
        } else if diff > 0.0 {
            MaRelation::Above
        } else {
            MaRelation::Below
        }
    }

    pub fn is_decisive(self) -> bool {
        self != MaRelation::Tied
    }
}

/// Indicator values at one bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub relation: MaRelation,
    /// Last decisive relation seen before this bar.
    pub prior_relation: Option<MaRelation>,
    pub rsi: f64,
    pub volatility: f64,
    pub atr: f64,
    pub band: BandState,
}

impl IndicatorSnapshot {
    /// MA spread relative to the slow MA.
    pub fn trend_strength(&self) -> f64 {
        if self.slow_ma == 0.0 {
            0.0
        } else {
            (self.fast_ma - self.slow_ma).abs() / self.slow_ma
        }
    }

    /// Close distance from the active band, relative to the band.
    pub fn band_distance(&self) -> f64 {
        if self.band.value == 0.0 {
            0.0
        } else {
            (self.close - self.band.value) / self.band.value
        }
    }
}

/// Streaming indicator state for one symbol/timeframe.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    epsilon: f64,
    fast: RollingMean,
    slow: RollingMean,
    band: TrendBand,
    rsi: RollingRsi,
    volatility: ReturnVolatility,
    required: usize,
    bars_seen: usize,
    last_decisive: Option<MaRelation>,
}

impl IndicatorEngine {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            epsilon: params.crossover_epsilon,
            fast: RollingMean::new(params.fast_window),
            slow: RollingMean::new(params.slow_window),
            band: TrendBand::new(params.band_period, params.band_multiplier),
            rsi: RollingRsi::new(params.rsi_period),
            volatility: ReturnVolatility::new(params.volatility_window),
            required: warmup_required(params),
            bars_seen: 0,
            last_decisive: None,
        }
    }

    /// Bars needed before the first snapshot.
    pub fn required(&self) -> usize {
        self.required
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    pub fn is_warm(&self) -> bool {
        self.bars_seen >= self.required
    }

    /// Feed one closed bar. Fails with `InsufficientWarmup` until every
    /// component has a full window; the bar is still absorbed.
    pub fn update(&mut self, bar: &Bar) -> Result<IndicatorSnapshot> {
        self.bars_seen += 1;
        let fast = self.fast.push(bar.close);
        let slow = self.slow.push(bar.close);
        let band = self.band.update(bar.high, bar.low, bar.close);
        let rsi = self.rsi.update(bar.close);
        let volatility = self.volatility.update(bar.close);

        let prior_relation = self.last_decisive;
        let relation = match (fast, slow) {
            (Some(f), Some(s)) => {
                let relation = MaRelation::of(f, s, self.epsilon);
                if relation.is_decisive() {
                    self.last_decisive = Some(relation);
                }
                Some(relation)
            }
            _ => None,
        };

        match (fast, slow, relation, band, rsi, volatility, self.band.atr()) {
            (
                Some(fast_ma),
                Some(slow_ma),
                Some(relation),
                Some(band),
                Some(rsi),
                Some(volatility),
                Some(atr),
            ) => Ok(IndicatorSnapshot {
                timestamp: bar.timestamp,
                close: bar.close,
                fast_ma,
                slow_ma,
                relation,
                prior_relation,
                rsi,
                volatility,
                atr,
                band,
            }),
            _ => Err(BacktestError::InsufficientWarmup {
                required: self.required,
                available: self.bars_seen,
            }),
        }
    }

    /// Drop all state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.band.reset();
        self.rsi.reset();
        self.volatility.reset();
        self.bars_seen = 0;
        self.last_decisive = None;
    }
}

pub fn warmup_required(params: &StrategyParams) -> usize {
    params
        .slow_window
        .max(params.fast_window)
        .max(params.band_period)
        .max(params.rsi_period + 1)
        .max(params.volatility_window + 1)
}

/// Recompute every snapshot from the full history with the batch functions.
pub fn compute_snapshots(bars: &[Bar], params: &StrategyParams) -> Vec<Option<IndicatorSnapshot>> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let fast = calculate_sma(&closes, params.fast_window);
    let slow = calculate_sma(&closes, params.slow_window);
    let atr = calculate_atr(&highs, &lows, &closes, params.band_period);
    let band = calculate_trend_band(&highs, &lows, &closes, params.band_period, params.band_multiplier);
    let rsi = calculate_rsi(&closes, params.rsi_period);
    let volatility = calculate_volatility(&closes, params.volatility_window);

    let mut last_decisive = None;
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let prior_relation = last_decisive;
        let relation = match (fast[i], slow[i]) {
            (Some(f), Some(s)) => {
                let relation = MaRelation::of(f, s, params.crossover_epsilon);
                if relation.is_decisive() {
                    last_decisive = Some(relation);
                }
                Some(relation)
            }
            _ => None,
        };

        let snapshot = match (fast[i], slow[i], relation, band[i], rsi[i], volatility[i], atr[i]) {
            (
                Some(fast_ma),
                Some(slow_ma),
                Some(relation),
                Some(band),
                Some(rsi),
                Some(volatility),
                Some(atr),
            ) => Some(IndicatorSnapshot {
                timestamp: bar.timestamp,
                close: bar.close,
                fast_ma,
                slow_ma,
                relation,
                prior_relation,
                rsi,
                volatility,
                atr,
                band,
            }),
            _ => None,
        };
        out.push(snapshot);
    }
    out
}
