//! Backtest order execution
//!
//! Entry orders are market orders worked against the bars that follow
//! their submission:
//! - Fill at the bar open with adverse slippage
//! - At most `volume_participation` of each bar's volume (partial fills)
//! - Remainder cancelled after `max_fill_bars` bars
//! - Rejected when the fill bar opens through the protective stop

use chrono::{DateTime, Utc};
use common::{Bar, ExecutionParams, Result, Side};
use tracing::debug;

use crate::orders::{Order, OrderEvent};

/// Receipt for a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderHandle {
    pub order_id: u64,
}

/// One lifecycle event, with the order as it stands after the event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub event: OrderEvent,
    pub order: Order,
}

/// Execution collaborator. A live venue would route orders to an exchange;
/// the backtest uses [`FillSimulator`].
pub trait ExecutionVenue {
    fn submit(&mut self, order: Order) -> OrderHandle;

    /// Lifecycle events caused by a new bar.
    fn poll(&mut self, bar: &Bar) -> Result<Vec<ExecutionReport>>;

    /// Cancel a working order; `None` if it is no longer working.
    fn cancel(
        &mut self,
        order_id: u64,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<ExecutionReport>>;

    fn open_orders(&self) -> Vec<&Order>;
}

/// Price after adverse slippage for a trade that buys (`Side::Long`) or sells.
pub fn slipped_price(price: f64, buying: Side, slippage_pct: f64) -> f64 {
    price * (1.0 + buying.sign() * slippage_pct)
}

#[derive(Debug, Clone)]
struct WorkingOrder {
    order: Order,
    bars_worked: usize,
}

/// Deterministic bar-driven fill model.
#[derive(Debug, Clone)]
pub struct FillSimulator {
    params: ExecutionParams,
    working: Vec<WorkingOrder>,
}

impl FillSimulator {
    pub fn new(params: ExecutionParams) -> Self {
        Self {
            params,
            working: Vec::new(),
        }
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    fn work(&self, w: &WorkingOrder, bar: &Bar) -> Option<OrderEvent> {
        let order = &w.order;
        let through_stop = match order.side {
            Side::Long => bar.open <= order.stop_price,
            Side::Short => bar.open >= order.stop_price,
        };

        if through_stop {
            let reason = format!(
                "Bar opened at {:.4} through stop {:.4}",
                bar.open, order.stop_price
            );
            return Some(if order.filled_size() > 0.0 {
                OrderEvent::Cancel {
                    timestamp: bar.timestamp,
                    reason,
                }
            } else {
                OrderEvent::Reject {
                    timestamp: bar.timestamp,
                    reason,
                }
            });
        }

        let capacity = self.params.volume_participation * bar.volume;
        let quantity = order.remaining().min(capacity);
        if quantity > 0.0 {
            Some(OrderEvent::Fill {
                quantity,
                price: slipped_price(bar.open, order.side, self.params.slippage_pct),
                timestamp: bar.timestamp,
            })
        } else {
            None
        }
    }
}

impl ExecutionVenue for FillSimulator {
    fn submit(&mut self, order: Order) -> OrderHandle {
        debug!(
            order_id = order.id,
            side = ?order.side,
            size = order.size,
            stop = order.stop_price,
            "Order submitted"
        );
        let handle = OrderHandle { order_id: order.id };
        self.working.push(WorkingOrder {
            order,
            bars_worked: 0,
        });
        handle
    }

    fn poll(&mut self, bar: &Bar) -> Result<Vec<ExecutionReport>> {
        let mut reports = Vec::new();
        let mut working = std::mem::take(&mut self.working);

        for w in working.iter_mut() {
            if let Some(event) = self.work(w, bar) {
                w.order.apply(&event)?;
                reports.push(ExecutionReport {
                    event,
                    order: w.order.clone(),
                });
            }
            w.bars_worked += 1;

            if !w.order.is_terminal() && w.bars_worked >= self.params.max_fill_bars {
                let event = OrderEvent::Cancel {
                    timestamp: bar.timestamp,
                    reason: format!("Unfilled after {} bars", w.bars_worked),
                };
                w.order.apply(&event)?;
                reports.push(ExecutionReport {
                    event,
                    order: w.order.clone(),
                });
            }
        }

        working.retain(|w| !w.order.is_terminal());
        self.working = working;
        Ok(reports)
    }

    fn cancel(
        &mut self,
        order_id: u64,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<ExecutionReport>> {
        let idx = match self.working.iter().position(|w| w.order.id == order_id) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let mut w = self.working.remove(idx);
        let event = OrderEvent::Cancel {
            timestamp,
            reason: reason.to_string(),
        };
        w.order.apply(&event)?;
        Ok(Some(ExecutionReport {
            event,
            order: w.order,
        }))
    }

    fn open_orders(&self) -> Vec<&Order> {
        self.working.iter().map(|w| &w.order).collect()
    }
}
