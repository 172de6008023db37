//! Volatility trend band (SuperTrend-style).
//!
//! The band sits `multiplier` × ATR away from the bar midpoint. The lower band
//! can only rise and the upper band can only fall while price respects them;
//! the trend flips when a close crosses the active band.

use serde::{Deserialize, Serialize};

use super::atr::{calculate_atr, AverageTrueRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandDirection {
    Up,
    Down,
}

/// Band output for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandState {
    pub direction: BandDirection,
    /// Active band: lower in an uptrend (support), upper in a downtrend.
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
    /// Direction changed on this bar.
    pub flipped: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bands {
    upper: f64,
    lower: f64,
    trending_up: bool,
}

impl Bands {
    fn seed(high: f64, low: f64, atr: f64, multiplier: f64) -> Self {
        let hl2 = (high + low) / 2.0;
        Self {
            upper: hl2 + multiplier * atr,
            lower: hl2 - multiplier * atr,
            trending_up: true,
        }
    }

    /// Advance by one bar; returns whether the direction flipped.
    fn step(
        &mut self,
        high: f64,
        low: f64,
        close: f64,
        prev_close: f64,
        atr: f64,
        multiplier: f64,
    ) -> bool {
        let hl2 = (high + low) / 2.0;
        let basic_upper = hl2 + multiplier * atr;
        let basic_lower = hl2 - multiplier * atr;

        self.upper = if prev_close <= self.upper {
            basic_upper.min(self.upper)
        } else {
            basic_upper
        };
        self.lower = if prev_close >= self.lower {
            basic_lower.max(self.lower)
        } else {
            basic_lower
        };

        let was_up = self.trending_up;
        if self.trending_up && close < self.lower {
            self.trending_up = false;
        } else if !self.trending_up && close > self.upper {
            self.trending_up = true;
        }
        was_up != self.trending_up
    }

    fn state(&self, flipped: bool) -> BandState {
        let (direction, value) = if self.trending_up {
            (BandDirection::Up, self.lower)
        } else {
            (BandDirection::Down, self.upper)
        };
        BandState {
            direction,
            value,
            upper: self.upper,
            lower: self.lower,
            flipped,
        }
    }
}

/// Incremental trend band.
#[derive(Debug, Clone)]
pub struct TrendBand {
    multiplier: f64,
    atr: AverageTrueRange,
    bands: Option<Bands>,
    prev_close: Option<f64>,
}

impl TrendBand {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            multiplier,
            atr: AverageTrueRange::new(period),
            bands: None,
            prev_close: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<BandState> {
        let atr = self.atr.update(high, low, close);
        let prev_close = self.prev_close.replace(close);
        let atr = atr?;

        match (self.bands.as_mut(), prev_close) {
            (Some(bands), Some(prev)) => {
                let flipped = bands.step(high, low, close, prev, atr, self.multiplier);
                Some(bands.state(flipped))
            }
            _ => {
                let bands = Bands::seed(high, low, atr, self.multiplier);
                self.bands = Some(bands);
                Some(bands.state(false))
            }
        }
    }

    pub fn atr(&self) -> Option<f64> {
        self.atr.value()
    }

    pub fn reset(&mut self) {
        self.atr.reset();
        self.bands = None;
        self.prev_close = None;
    }
}

/// Batch trend band over full price history.
pub fn calculate_trend_band(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    multiplier: f64,
) -> Vec<Option<BandState>> {
    let atr = calculate_atr(highs, lows, closes, period);
    let mut out = vec![None; atr.len()];

    let start = match atr.iter().position(|v| v.is_some()) {
        Some(idx) => idx,
        None => return out,
    };

    let mut bands = Bands::seed(highs[start], lows[start], atr[start].unwrap_or(0.0), multiplier);
    out[start] = Some(bands.state(false));

    for i in (start + 1)..atr.len() {
        if let Some(a) = atr[i] {
            let flipped = bands.step(highs[i], lows[i], closes[i], closes[i - 1], a, multiplier);
            out[i] = Some(bands.state(flipped));
        }
    }

    out
}
