use chrono::{DateTime, Utc};
use common::{Bar, ExitFill, ExitReason, Side, TakeProfitLevel, Trade};
use tracing::debug;

use crate::execution::slipped_price;
use crate::orders::Order;

/// Open position built from the fills of one entry order.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub leverage: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar: u64,
    pub avg_entry_price: f64,
    /// Total quantity filled into the position.
    pub filled_size: f64,
    pub remaining: f64,
    pub stop_price: f64,
    pub take_profit_ladder: Vec<TakeProfitLevel>,
    /// Rungs of the ladder already taken.
    pub rungs_hit: usize,
    /// Most favourable price seen on completed bars since entry.
    pub peak: f64,
    pub entry_fees: f64,
    /// Entry and exit fees together.
    pub fees: f64,
    pub exits: Vec<ExitFill>,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.avg_entry_price) * self.remaining
    }

    pub fn is_trailing(&self) -> bool {
        !self.take_profit_ladder.is_empty() && self.rungs_hit >= self.take_profit_ladder.len()
    }

    /// Protective level in force and the reason it would close the position.
    pub fn active_stop(&self, trailing_pct: f64) -> (f64, ExitReason) {
        if !self.is_trailing() {
            return (self.stop_price, ExitReason::StopLoss);
        }
        let trail = self.peak * (1.0 - self.side.sign() * trailing_pct);
        let tighter = match self.side {
            Side::Long => trail > self.stop_price,
            Side::Short => trail < self.stop_price,
        };
        if tighter {
            (trail, ExitReason::TrailingStop)
        } else {
            (self.stop_price, ExitReason::StopLoss)
        }
    }

    fn is_flat(&self) -> bool {
        self.remaining <= self.filled_size * 1e-9
    }
}

/// Account and position bookkeeping for one run.
#[derive(Debug)]
pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    fee_rate: f64,
    slippage_pct: f64,
    trailing_pct: f64,
    last_price: Option<f64>,
    position: Option<Position>,
    trades: Vec<Trade>,
}

impl Portfolio {
    pub fn new(initial_capital: f64, fee_rate: f64, slippage_pct: f64, trailing_pct: f64) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            fee_rate,
            slippage_pct,
            trailing_pct,
            last_price: None,
            position: None,
            trades: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Realized balance, net of fees.
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Cash plus unrealized P&L at the last marked price.
    pub fn equity(&self) -> f64 {
        let unrealized = match (&self.position, self.last_price) {
            (Some(pos), Some(price)) => pos.unrealized_pnl(price),
            _ => 0.0,
        };
        self.cash + unrealized
    }

    pub fn mark(&mut self, price: f64) {
        self.last_price = Some(price);
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    /// Add an entry fill. The first fill opens the position.
    pub fn apply_entry_fill(
        &mut self,
        order: &Order,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
        bar_index: u64,
    ) {
        let fee = quantity * price * self.fee_rate;
        self.cash -= fee;

        match self.position.as_mut() {
            Some(pos) if pos.order_id == order.id => {
                let total = pos.filled_size + quantity;
                pos.avg_entry_price =
                    (pos.avg_entry_price * pos.filled_size + price * quantity) / total;
                pos.filled_size = total;
                pos.remaining += quantity;
                pos.entry_fees += fee;
                pos.fees += fee;
            }
            _ => {
                self.position = Some(Position {
                    order_id: order.id,
                    symbol: order.symbol.clone(),
                    side: order.side,
                    leverage: order.leverage,
                    entry_time: timestamp,
                    entry_bar: bar_index,
                    avg_entry_price: price,
                    filled_size: quantity,
                    remaining: quantity,
                    stop_price: order.stop_price,
                    take_profit_ladder: order.take_profit_ladder.clone(),
                    rungs_hit: 0,
                    peak: price,
                    entry_fees: fee,
                    fees: fee,
                    exits: Vec::new(),
                });
            }
        }
        debug!(order_id = order.id, quantity, price, "Entry fill");
    }

    /// Run the protective levels against `bar`. When the stop and a target
    /// both lie inside the bar range, the stop is assumed to trade first.
    pub fn process_bar(&mut self, bar: &Bar, bar_index: u64) -> Option<Trade> {
        let trailing_pct = self.trailing_pct;
        let pos = self.position.as_ref()?;
        let side = pos.side;

        let (level, reason) = pos.active_stop(trailing_pct);
        let stop_hit = match side {
            Side::Long => bar.low <= level,
            Side::Short => bar.high >= level,
        };
        if stop_hit {
            // Gaps fill at the open
            let trigger = match side {
                Side::Long => level.min(bar.open),
                Side::Short => level.max(bar.open),
            };
            let price = slipped_price(trigger, side.opposite(), self.slippage_pct);
            let qty = pos.remaining;
            self.exit(qty, price, bar.timestamp, reason);
            return self.settle_if_flat(bar.timestamp, bar_index);
        }

        let rungs: Vec<(usize, TakeProfitLevel)> = pos
            .take_profit_ladder
            .iter()
            .copied()
            .enumerate()
            .skip(pos.rungs_hit)
            .collect();
        for (i, rung) in rungs {
            let reached = match side {
                Side::Long => bar.high >= rung.price,
                Side::Short => bar.low <= rung.price,
            };
            if !reached {
                break;
            }
            let reason = if i == 0 {
                ExitReason::TakeProfit1
            } else {
                ExitReason::TakeProfit2
            };
            let qty = match self.position.as_mut() {
                Some(pos) => {
                    pos.rungs_hit = i + 1;
                    (rung.fraction * pos.filled_size).min(pos.remaining)
                }
                None => break,
            };
            self.exit(qty, rung.price, bar.timestamp, reason);
        }

        if let Some(trade) = self.settle_if_flat(bar.timestamp, bar_index) {
            return Some(trade);
        }

        if let Some(pos) = self.position.as_mut() {
            pos.peak = match side {
                Side::Long => pos.peak.max(bar.high),
                Side::Short => pos.peak.min(bar.low),
            };
        }
        None
    }

    /// Close whatever remains at `price` (before slippage).
    pub fn close_position(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        bar_index: u64,
        reason: ExitReason,
    ) -> Option<Trade> {
        let (qty, side) = {
            let pos = self.position.as_ref()?;
            (pos.remaining, pos.side)
        };
        let fill = slipped_price(price, side.opposite(), self.slippage_pct);
        self.exit(qty, fill, timestamp, reason);
        self.settle_if_flat(timestamp, bar_index)
    }

    fn exit(&mut self, quantity: f64, price: f64, timestamp: DateTime<Utc>, reason: ExitReason) {
        let pos = match self.position.as_mut() {
            Some(pos) if quantity > 0.0 => pos,
            _ => return,
        };
        let gross = pos.side.sign() * (price - pos.avg_entry_price) * quantity;
        let fee = quantity * price * self.fee_rate;
        pos.remaining -= quantity;
        pos.fees += fee;
        pos.exits.push(ExitFill {
            timestamp,
            price,
            size: quantity,
            reason,
            pnl: gross - fee,
        });
        self.cash += gross - fee;
        debug!(order_id = pos.order_id, quantity, price, ?reason, "Exit fill");
    }

    fn settle_if_flat(&mut self, timestamp: DateTime<Utc>, bar_index: u64) -> Option<Trade> {
        if !self.position.as_ref()?.is_flat() {
            return None;
        }
        let pos = self.position.take()?;

        let exited: f64 = pos.exits.iter().map(|e| e.size).sum();
        let exit_price = if exited > 0.0 {
            pos.exits.iter().map(|e| e.price * e.size).sum::<f64>() / exited
        } else {
            pos.avg_entry_price
        };
        let pnl = pos.exits.iter().map(|e| e.pnl).sum::<f64>() - pos.entry_fees;
        let margin = pos.avg_entry_price * pos.filled_size / pos.leverage;
        let pnl_pct = if margin > 0.0 { pnl / margin * 100.0 } else { 0.0 };
        let exit_reason = pos.exits.last().map_or(ExitReason::EndOfData, |e| e.reason);

        let trade = Trade {
            order_id: pos.order_id,
            symbol: pos.symbol,
            side: pos.side,
            entry_date: pos.entry_time,
            entry_price: pos.avg_entry_price,
            exit_date: timestamp,
            exit_price,
            size: pos.filled_size,
            leverage: pos.leverage,
            pnl,
            pnl_pct,
            fees: pos.fees,
            holding_bars: bar_index.saturating_sub(pos.entry_bar),
            exit_reason,
            exits: pos.exits,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::take_profit_ladder;
    use chrono::Duration;

    fn ts(h: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap() + Duration::hours(h)
    }

    fn long_order() -> Order {
        // risk 2 -> targets 103 and 104
        Order::new(
            1,
            "BTC-USDT",
            Side::Long,
            10.0,
            100.0,
            98.0,
            take_profit_ladder(Side::Long, 100.0, 98.0),
            5.0,
            ts(0),
        )
    }

    fn short_order() -> Order {
        Order::new(
            2,
            "BTC-USDT",
            Side::Short,
            10.0,
            100.0,
            102.0,
            take_profit_ladder(Side::Short, 100.0, 102.0),
            5.0,
            ts(0),
        )
    }

    fn bar(h: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(ts(h), open, high, low, close, 1_000.0)
    }

    fn open_long() -> Portfolio {
        let mut p = Portfolio::new(10_000.0, 0.0, 0.0, 0.03);
        p.apply_entry_fill(&long_order(), 10.0, 100.0, ts(1), 1);
        p
    }

    #[test]
    fn test_equity_marks_unrealized() {
        let mut p = open_long();
        p.mark(101.0);
        assert!((p.equity() - 10_010.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_before_target_in_same_bar() {
        let mut p = open_long();
        // range covers both 98 and 104
        let trade = p.process_bar(&bar(2, 100.0, 105.0, 97.0, 101.0), 2).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exits.len(), 1);
        assert!((trade.exit_price - 98.0).abs() < 1e-9);
        assert!((trade.pnl + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_below_stop_fills_at_open() {
        let mut p = open_long();
        let trade = p.process_bar(&bar(2, 96.0, 96.5, 95.0, 96.0), 2).unwrap();
        assert!((trade.exit_price - 96.0).abs() < 1e-9);
    }

    #[test]
    fn test_ladder_then_trailing() {
        let mut p = open_long();
        // TP1 only
        assert!(p.process_bar(&bar(2, 100.0, 103.5, 99.0, 103.0), 2).is_none());
        assert!((p.position().unwrap().remaining - 7.0).abs() < 1e-9);
        // TP2, peak becomes 110
        assert!(p.process_bar(&bar(3, 103.0, 110.0, 102.5, 109.0), 3).is_none());
        let pos = p.position().unwrap();
        assert!((pos.remaining - 4.0).abs() < 1e-9);
        assert!(pos.is_trailing());
        assert_eq!(pos.peak, 110.0);

        // trail at 110 * 0.97 = 106.7
        let trade = p.process_bar(&bar(4, 108.0, 108.5, 106.0, 106.5), 4).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
        assert_eq!(trade.exits.len(), 3);
        assert_eq!(trade.holding_bars, 3);
        // 3*3 + 3*4 + 4*6.7
        assert!((trade.pnl - 47.8).abs() < 1e-9);
        assert!((p.cash() - 10_047.8).abs() < 1e-9);
    }

    #[test]
    fn test_short_mirror() {
        let mut p = Portfolio::new(10_000.0, 0.0, 0.0, 0.03);
        p.apply_entry_fill(&short_order(), 10.0, 100.0, ts(1), 1);
        assert!(p.process_bar(&bar(2, 99.0, 99.5, 96.5, 97.0), 2).is_none());
        let pos = p.position().unwrap();
        assert_eq!(pos.rungs_hit, 1);
        let trade = p.process_bar(&bar(3, 97.0, 102.5, 96.0, 102.0), 3).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        // 3 * 3 - 7 * 2
        assert!((trade.pnl + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_fees_and_signal_close() {
        let mut p = Portfolio::new(10_000.0, 0.001, 0.0, 0.03);
        p.apply_entry_fill(&long_order(), 10.0, 100.0, ts(1), 1);
        let trade = p.close_position(102.0, ts(5), 5, ExitReason::Signal).unwrap();
        // gross 20, fees 1.0 + 1.02
        assert!((trade.fees - 2.02).abs() < 1e-9);
        assert!((trade.pnl - 17.98).abs() < 1e-9);
        assert!((p.cash() - 10_017.98).abs() < 1e-9);
        assert!(p.position().is_none());
    }

    #[test]
    fn test_partial_entry_fills_average() {
        let mut p = Portfolio::new(10_000.0, 0.0, 0.0, 0.03);
        let order = long_order();
        p.apply_entry_fill(&order, 4.0, 100.0, ts(1), 1);
        p.apply_entry_fill(&order, 6.0, 101.0, ts(2), 2);
        let pos = p.position().unwrap();
        assert!((pos.avg_entry_price - 100.6).abs() < 1e-9);
        assert_eq!(pos.entry_bar, 1);
        assert!((pos.remaining - 10.0).abs() < 1e-9);
    }
}
