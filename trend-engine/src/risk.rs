//! Position sizing and trading circuit breakers.

use chrono::{DateTime, NaiveDate, Utc};
use common::{LeverageTier, RiskLimits, Side, Signal, TakeProfitLevel};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orders::Order;

/// Take-profit rungs as multiples of the entry-to-stop distance.
pub const TAKE_PROFIT_R: [f64; 2] = [1.5, 2.0];

/// Fraction of the position closed at each rung; the rest trails.
pub const TAKE_PROFIT_FRACTION: f64 = 0.3;

/// Why the sizer did or did not produce an order.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized(Order),
    /// Signal does not ask for an entry.
    NotAnEntry,
    /// Computed notional under the minimum tradable amount.
    BelowMinimum { notional: f64 },
    /// Daily loss limit hit; no new orders until the next UTC day.
    DailyLossLimitBreached,
    /// Too many losing trades in a row; no new orders until the next UTC day.
    ConsecutiveLossLimit,
    /// Equity below every leverage tier.
    NoLeverageTier,
}

impl SizingOutcome {
    pub fn into_order(self) -> Option<Order> {
        match self {
            SizingOutcome::Sized(order) => Some(order),
            _ => None,
        }
    }
}

/// Highest tier whose threshold is at or below `equity`; equal thresholds
/// resolve to the lower leverage.
pub fn leverage_for(tiers: &[LeverageTier], equity: f64) -> Option<f64> {
    let mut best: Option<&LeverageTier> = None;
    for tier in tiers.iter().filter(|t| t.equity_threshold <= equity) {
        best = match best {
            Some(b) if b.equity_threshold > tier.equity_threshold => Some(b),
            Some(b) if b.equity_threshold == tier.equity_threshold && b.leverage <= tier.leverage => {
                Some(b)
            }
            _ => Some(tier),
        };
    }
    best.map(|t| t.leverage)
}

/// Protective stop `stop_loss_pct` away from `entry`, against the position.
pub fn stop_price(side: Side, entry: f64, stop_loss_pct: f64) -> f64 {
    entry * (1.0 - side.sign() * stop_loss_pct)
}

/// Fixed ladder: 30% at 1.5R, 30% at 2.0R. The remaining 40% trails.
pub fn take_profit_ladder(side: Side, entry: f64, stop: f64) -> Vec<TakeProfitLevel> {
    let risk = (entry - stop).abs();
    TAKE_PROFIT_R
        .iter()
        .map(|r| TakeProfitLevel {
            fraction: TAKE_PROFIT_FRACTION,
            price: entry + side.sign() * r * risk,
        })
        .collect()
}

/// Per-day risk state, reset at each UTC midnight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub day: Option<NaiveDate>,
    pub day_start_equity: f64,
    pub daily_limit_breached: bool,
    pub consecutive_losses: u32,
}

/// Converts entry signals into sized orders.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    limits: RiskLimits,
    next_order_id: u64,
    state: DailyRiskState,
}

impl PositionSizer {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            next_order_id: 1,
            state: DailyRiskState::default(),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &DailyRiskState {
        &self.state
    }

    /// Track equity at `timestamp`. The first observation of a UTC day sets
    /// that day's starting equity and clears both breakers.
    pub fn observe_equity(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        let day = timestamp.date_naive();
        if self.state.day != Some(day) {
            self.state.day = Some(day);
            self.state.day_start_equity = equity;
            self.state.daily_limit_breached = false;
            self.state.consecutive_losses = 0;
        }
        self.check_daily_loss(equity);
    }

    fn check_daily_loss(&mut self, equity: f64) {
        if self.state.daily_limit_breached || self.state.day_start_equity <= 0.0 {
            return;
        }
        let loss = self.state.day_start_equity - equity;
        if loss >= self.limits.daily_loss_limit_pct * self.state.day_start_equity {
            self.state.daily_limit_breached = true;
            warn!(
                day = ?self.state.day,
                day_start_equity = self.state.day_start_equity,
                equity,
                "Daily loss limit reached, new orders suspended for the day"
            );
        }
    }

    /// Record a closed trade for the consecutive-loss breaker.
    pub fn record_trade(&mut self, pnl: f64) {
        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
            let max = self.limits.max_consecutive_losses;
            if max > 0 && self.state.consecutive_losses == max {
                info!(
                    losses = self.state.consecutive_losses,
                    "Consecutive loss limit reached, entries paused"
                );
            }
        } else {
            self.state.consecutive_losses = 0;
        }
    }

    pub fn is_halted(&self) -> bool {
        let max = self.limits.max_consecutive_losses;
        self.state.daily_limit_breached || (max > 0 && self.state.consecutive_losses >= max)
    }

    /// Full sizing decision for `signal` at `equity`.
    pub fn decide(&mut self, signal: &Signal, equity: f64) -> SizingOutcome {
        let side = match signal.action.entry_side() {
            Some(side) => side,
            None => return SizingOutcome::NotAnEntry,
        };

        self.check_daily_loss(equity);
        if self.state.daily_limit_breached {
            return SizingOutcome::DailyLossLimitBreached;
        }
        let max_losses = self.limits.max_consecutive_losses;
        if max_losses > 0 && self.state.consecutive_losses >= max_losses {
            return SizingOutcome::ConsecutiveLossLimit;
        }

        let leverage = match leverage_for(&self.limits.leverage_tiers, equity) {
            Some(l) => l,
            None => return SizingOutcome::NoLeverageTier,
        };

        let price = signal.price;
        if equity <= 0.0 || price <= 0.0 || !price.is_finite() {
            return SizingOutcome::BelowMinimum { notional: 0.0 };
        }

        // Unlevered size is the smaller of the fraction cap and the stop-derived
        // risk size; the tier's leverage then scales it as a whole.
        let capped = self.limits.max_position_fraction * equity;
        let risk_based = equity * self.limits.risk_per_trade / self.limits.stop_loss_pct;
        let notional = capped.min(risk_based) * leverage;
        if notional < self.limits.min_order_notional {
            return SizingOutcome::BelowMinimum { notional };
        }

        let stop = stop_price(side, price, self.limits.stop_loss_pct);
        let ladder = take_profit_ladder(side, price, stop);
        let id = self.next_order_id;
        self.next_order_id += 1;

        SizingOutcome::Sized(Order::new(
            id,
            signal.symbol.clone(),
            side,
            notional / price,
            price,
            stop,
            ladder,
            leverage,
            signal.timestamp,
        ))
    }

    /// Sized order for `signal`, or `None` when no order should be placed.
    pub fn size(&mut self, signal: &Signal, equity: f64) -> Option<Order> {
        self.decide(signal, equity).into_order()
    }
}
