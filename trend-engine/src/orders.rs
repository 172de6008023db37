//! Order lifecycle.
//!
//! ```text
//! Pending --fill(all)--> Filled
//! Pending --fill(part)--> PartiallyFilled --fill(rest)--> Filled
//! Pending --reject--> Rejected
//! Pending | PartiallyFilled --cancel--> Cancelled
//! ```
//!
//! Filled, Rejected and Cancelled absorb nothing: any event there is an
//! `InvalidTransition`.

use chrono::{DateTime, Utc};
use common::{BacktestError, OrderRecord, OrderState, Result, Side, TakeProfitLevel};
use serde::{Deserialize, Serialize};
use tracing::error;

/// External notification about an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OrderEvent {
    Fill {
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    },
    Cancel {
        timestamp: DateTime<Utc>,
        reason: String,
    },
    Reject {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl OrderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Fill { .. } => "fill",
            OrderEvent::Cancel { .. } => "cancel",
            OrderEvent::Reject { .. } => "reject",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Fill { timestamp, .. }
            | OrderEvent::Cancel { timestamp, .. }
            | OrderEvent::Reject { timestamp, .. } => *timestamp,
        }
    }
}

/// An entry order with its protective levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    /// Reference price the order was sized at.
    pub entry_price: f64,
    pub stop_price: f64,
    pub take_profit_ladder: Vec<TakeProfitLevel>,
    pub leverage: f64,
    pub created_at: DateTime<Utc>,
    state: OrderState,
    filled_size: f64,
    fill_notional: f64,
    closed_at: Option<DateTime<Utc>>,
    note: Option<String>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        symbol: impl Into<String>,
        side: Side,
        size: f64,
        entry_price: f64,
        stop_price: f64,
        take_profit_ladder: Vec<TakeProfitLevel>,
        leverage: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            size,
            entry_price,
            stop_price,
            take_profit_ladder,
            leverage,
            created_at,
            state: OrderState::Pending,
            filled_size: 0.0,
            fill_notional: 0.0,
            closed_at: None,
            note: None,
        }
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn filled_size(&self) -> f64 {
        self.filled_size
    }

    pub fn remaining(&self) -> f64 {
        (self.size - self.filled_size).max(0.0)
    }

    pub fn avg_fill_price(&self) -> Option<f64> {
        (self.filled_size > 0.0).then(|| self.fill_notional / self.filled_size)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one event. Fills larger than the remaining size are clamped.
    pub fn apply(&mut self, event: &OrderEvent) -> Result<OrderState> {
        let next = match (self.state, event) {
            (
                OrderState::Pending | OrderState::PartiallyFilled,
                OrderEvent::Fill {
                    quantity, price, ..
                },
            ) if *quantity > 0.0 && quantity.is_finite() && *price > 0.0 => {
                let qty = quantity.min(self.remaining());
                self.filled_size += qty;
                self.fill_notional += qty * price;
                // Float dust counts as complete
                if self.remaining() <= self.size * 1e-9 {
                    self.filled_size = self.size;
                    OrderState::Filled
                } else {
                    OrderState::PartiallyFilled
                }
            }
            (OrderState::Pending | OrderState::PartiallyFilled, OrderEvent::Cancel { reason, .. }) => {
                self.note = Some(reason.clone());
                OrderState::Cancelled
            }
            (OrderState::Pending, OrderEvent::Reject { reason, .. }) => {
                self.note = Some(reason.clone());
                OrderState::Rejected
            }
            (from, event) => {
                error!(
                    order_id = self.id,
                    symbol = %self.symbol,
                    from = %from,
                    event = event.name(),
                    filled = self.filled_size,
                    size = self.size,
                    "Invalid order transition"
                );
                return Err(BacktestError::InvalidTransition {
                    order_id: self.id,
                    symbol: self.symbol.clone(),
                    from: from.to_string(),
                    event: event.name().to_string(),
                });
            }
        };

        self.state = next;
        if next.is_terminal() {
            self.closed_at = Some(event.timestamp());
        }
        Ok(next)
    }

    /// Freeze a terminal order into its archived record.
    pub fn archive(&self) -> Result<OrderRecord> {
        let closed_at = match (self.is_terminal(), self.closed_at) {
            (true, Some(ts)) => ts,
            _ => {
                return Err(BacktestError::InvalidTransition {
                    order_id: self.id,
                    symbol: self.symbol.clone(),
                    from: self.state.to_string(),
                    event: "archive".to_string(),
                })
            }
        };

        Ok(OrderRecord {
            id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            size: self.size,
            filled_size: self.filled_size,
            avg_fill_price: self.avg_fill_price(),
            entry_price: self.entry_price,
            stop_price: self.stop_price,
            take_profit_ladder: self.take_profit_ladder.clone(),
            leverage: self.leverage,
            final_state: self.state,
            created_at: self.created_at,
            closed_at,
            note: self.note.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn order() -> Order {
        Order::new(7, "BTC-USDT", Side::Long, 10.0, 100.0, 98.0, Vec::new(), 10.0, ts())
    }

    fn fill(quantity: f64, price: f64) -> OrderEvent {
        OrderEvent::Fill {
            quantity,
            price,
            timestamp: ts(),
        }
    }

    fn cancel() -> OrderEvent {
        OrderEvent::Cancel {
            timestamp: ts(),
            reason: "timeout".into(),
        }
    }

    fn reject() -> OrderEvent {
        OrderEvent::Reject {
            timestamp: ts(),
            reason: "gap through stop".into(),
        }
    }

    #[test]
    fn test_full_fill() {
        let mut o = order();
        assert_eq!(o.apply(&fill(10.0, 100.5)).unwrap(), OrderState::Filled);
        assert_eq!(o.avg_fill_price(), Some(100.5));
        let record = o.archive().unwrap();
        assert_eq!(record.final_state, OrderState::Filled);
        assert_eq!(record.filled_size, 10.0);
    }

    #[test]
    fn test_partial_then_fill_averages_price() {
        let mut o = order();
        assert_eq!(o.apply(&fill(4.0, 100.0)).unwrap(), OrderState::PartiallyFilled);
        assert!((o.remaining() - 6.0).abs() < 1e-12);
        // oversized fill is clamped
        assert_eq!(o.apply(&fill(50.0, 101.0)).unwrap(), OrderState::Filled);
        assert_eq!(o.filled_size(), 10.0);
        assert!((o.avg_fill_price().unwrap() - 100.6).abs() < 1e-12);
    }

    #[test]
    fn test_partial_then_cancel_keeps_fill() {
        let mut o = order();
        o.apply(&fill(3.0, 100.0)).unwrap();
        assert_eq!(o.apply(&cancel()).unwrap(), OrderState::Cancelled);
        let record = o.archive().unwrap();
        assert_eq!(record.filled_size, 3.0);
        assert_eq!(record.note.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_partial_cannot_be_rejected() {
        let mut o = order();
        o.apply(&fill(3.0, 100.0)).unwrap();
        let err = o.apply(&reject()).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidTransition { .. }));
        assert_eq!(o.state(), OrderState::PartiallyFilled);
    }

    #[test]
    fn test_terminal_states_absorb_nothing() {
        let mut filled = order();
        filled.apply(&fill(10.0, 100.0)).unwrap();
        let mut rejected = order();
        rejected.apply(&reject()).unwrap();
        let mut cancelled = order();
        cancelled.apply(&cancel()).unwrap();

        for o in [&mut filled, &mut rejected, &mut cancelled] {
            let before = o.state();
            for event in [fill(1.0, 100.0), cancel(), reject()] {
                match o.apply(&event).unwrap_err() {
                    BacktestError::InvalidTransition { order_id, from, .. } => {
                        assert_eq!(order_id, 7);
                        assert_eq!(from, before.to_string());
                    }
                    other => panic!("unexpected error {:?}", other),
                }
            }
            assert_eq!(o.state(), before);
        }
    }

    #[test]
    fn test_zero_fill_is_invalid() {
        let mut o = order();
        assert!(o.apply(&fill(0.0, 100.0)).is_err());
        assert_eq!(o.state(), OrderState::Pending);
    }

    #[test]
    fn test_archive_requires_terminal() {
        assert!(order().archive().is_err());
    }
}
