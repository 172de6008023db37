use common::{Direction, Regime, Side, Signal, SignalAction, StrategyParams, Timeframe};

use crate::indicators::{BandDirection, BandState, IndicatorSnapshot, MaRelation};

/// Dual moving average crossover filtered by the trend band.
///
/// Entry: fast crosses slow in the band's direction.
/// Exit: cross back, or the band flips against the position.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    symbol: String,
    min_strength: f64,
}

impl SignalGenerator {
    pub fn new(symbol: impl Into<String>, params: &StrategyParams) -> Self {
        Self {
            symbol: symbol.into(),
            min_strength: params.min_strength,
        }
    }

    /// Evaluate one closed bar. Pure: the same inputs always give the same signal.
    pub fn evaluate(
        &self,
        snapshot: &IndicatorSnapshot,
        band: &BandState,
        regime: Regime,
        timeframe: Timeframe,
    ) -> Signal {
        let cross = match (snapshot.prior_relation, snapshot.relation) {
            (Some(prev), cur) if cur.is_decisive() && prev != cur => Some(cur),
            _ => None,
        };

        let (action, reason) = match cross {
            // A flip on the cross bar overrides the cross when they disagree
            Some(MaRelation::Above) if band.flipped && band.direction == BandDirection::Down => (
                SignalAction::ExitLong,
                format!("Trend band flipped down at {:.4}", band.value),
            ),
            Some(MaRelation::Below) if band.flipped && band.direction == BandDirection::Up => (
                SignalAction::ExitShort,
                format!("Trend band flipped up at {:.4}", band.value),
            ),
            Some(MaRelation::Above) if band.direction == BandDirection::Up => (
                SignalAction::EnterLong,
                format!(
                    "Fast MA {:.4} crossed above slow MA {:.4}, band up",
                    snapshot.fast_ma, snapshot.slow_ma
                ),
            ),
            Some(MaRelation::Above) => (
                SignalAction::ExitShort,
                "Fast MA crossed above slow MA against a down band".to_string(),
            ),
            Some(MaRelation::Below) if band.direction == BandDirection::Down => (
                SignalAction::EnterShort,
                format!(
                    "Fast MA {:.4} crossed below slow MA {:.4}, band down",
                    snapshot.fast_ma, snapshot.slow_ma
                ),
            ),
            Some(_) => (
                SignalAction::ExitLong,
                "Fast MA crossed below slow MA against an up band".to_string(),
            ),
            None if band.flipped => match band.direction {
                BandDirection::Down => (
                    SignalAction::ExitLong,
                    format!("Trend band flipped down at {:.4}", band.value),
                ),
                BandDirection::Up => (
                    SignalAction::ExitShort,
                    format!("Trend band flipped up at {:.4}", band.value),
                ),
            },
            None => (SignalAction::Hold, String::new()),
        };

        let (action, strength, reason) = match action.entry_side() {
            Some(side) => {
                let strength = base_confidence(snapshot, band, side) * regime_factor(regime);
                if strength < self.min_strength {
                    // Too weak to open, but the cross still closes the other side
                    let exit = match side {
                        Side::Long => SignalAction::ExitShort,
                        Side::Short => SignalAction::ExitLong,
                    };
                    (
                        exit,
                        1.0,
                        format!("{} (strength {:.2} below {:.2})", reason, strength, self.min_strength),
                    )
                } else {
                    (action, strength, reason)
                }
            }
            None if action == SignalAction::Hold => (action, 0.0, reason),
            None => (action, 1.0, reason),
        };

        let direction = match action {
            SignalAction::Hold => Direction::Flat,
            _ => action.direction(),
        };

        Signal {
            symbol: self.symbol.clone(),
            timeframe,
            direction,
            action,
            strength,
            price: snapshot.close,
            timestamp: snapshot.timestamp,
            reason,
        }
    }
}

/// Confidence of an entry on `side`, in [0, 0.95].
pub fn base_confidence(snapshot: &IndicatorSnapshot, band: &BandState, side: Side) -> f64 {
    let mut confidence: f64 = 0.6;

    let trend = snapshot.trend_strength();
    if trend > 0.02 {
        confidence += 0.15;
    } else if trend > 0.01 {
        confidence += 0.08;
    }

    // RSI: favour entries that are not yet stretched in the trade direction
    let rsi = snapshot.rsi;
    let (with_trade, against_trade) = match side {
        Side::Long => (rsi <= 30.0, rsi >= 70.0),
        Side::Short => (rsi >= 70.0, rsi <= 30.0),
    };
    if rsi > 30.0 && rsi < 70.0 {
        confidence += 0.1;
    } else if with_trade {
        confidence += 0.15;
    } else if against_trade {
        confidence -= 0.1;
    }

    if band.value != 0.0 {
        let distance = side.sign() * (snapshot.close - band.value) / band.value;
        if distance > 0.01 {
            confidence += 0.05;
        }
    }

    let vol = snapshot.volatility;
    if vol > 0.01 && vol < 0.05 {
        confidence += 0.05;
    } else if vol > 0.08 {
        confidence -= 0.1;
    }

    confidence.clamp(0.0, 0.95)
}

/// Strength multiplier per regime.
pub fn regime_factor(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 1.0,
        Regime::Unknown => 0.9,
        Regime::Ranging => 0.8,
        Regime::Volatile => 0.7,
    }
}
