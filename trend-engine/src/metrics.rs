use chrono::{DateTime, Utc};
use common::{SummaryStats, Timeframe, Trade};

/// Reduces a run's trades and equity curve into summary statistics.
///
/// Every sum is taken in curve/trade order, so identical inputs give
/// bit-identical output.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceAggregator {
    initial_capital: f64,
    periods_per_year: f64,
}

impl PerformanceAggregator {
    pub fn new(initial_capital: f64, timeframe: Timeframe) -> Self {
        Self {
            initial_capital,
            periods_per_year: timeframe.periods_per_year(),
        }
    }

    pub fn summarize(&self, trades: &[Trade], equity_curve: &[(DateTime<Utc>, f64)]) -> SummaryStats {
        let final_equity = equity_curve
            .last()
            .map(|(_, e)| *e)
            .unwrap_or(self.initial_capital);
        let total_return = final_equity - self.initial_capital;
        let total_return_pct = if self.initial_capital != 0.0 {
            total_return / self.initial_capital * 100.0
        } else {
            0.0
        };

        let returns = period_returns(equity_curve);
        let annualizer = self.periods_per_year.sqrt();
        let std = population_std(&returns);
        let mean = mean(&returns);

        let volatility = std * annualizer;
        let sharpe_ratio = if std > 0.0 { mean / std * annualizer } else { 0.0 };
        let downside = downside_deviation(&returns);
        let sortino_ratio = if downside > 0.0 {
            mean / downside * annualizer
        } else {
            0.0
        };
        let (max_drawdown, max_drawdown_duration_bars) = max_drawdown(equity_curve);

        let stats = trade_stats(trades);

        SummaryStats {
            total_return,
            total_return_pct,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration_bars,
            total_trades: trades.len() as u32,
            winning_trades: stats.winning,
            losing_trades: stats.losing,
            win_rate: stats.win_rate,
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
            profit_factor: stats.profit_factor,
            expectancy: stats.expectancy,
            avg_holding_bars: stats.avg_holding_bars,
            best_trade: stats.best,
            worst_trade: stats.worst,
        }
    }
}

/// Per-period returns `(E_t - E_{t-1}) / E_{t-1}`.
pub fn period_returns(equity_curve: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].1;
            let curr = w[1].1;
            if prev != 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for v in values {
        sum += v;
    }
    sum / values.len() as f64
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let mut sum = 0.0;
    for v in values {
        sum += (v - m).powi(2);
    }
    (sum / values.len() as f64).sqrt()
}

/// Root mean square of the negative returns, over all periods.
fn downside_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for v in values.iter().filter(|v| **v < 0.0) {
        sum += v * v;
    }
    (sum / values.len() as f64).sqrt()
}

/// Largest `(peak - equity) / peak` and the bars from that peak to the trough.
pub fn max_drawdown(equity_curve: &[(DateTime<Utc>, f64)]) -> (f64, u64) {
    let first = match equity_curve.first() {
        Some((_, e)) => *e,
        None => return (0.0, 0),
    };

    let mut peak = first;
    let mut peak_idx = 0;
    let mut max_dd = 0.0;
    let mut duration = 0u64;

    for (i, (_, equity)) in equity_curve.iter().enumerate() {
        if *equity > peak {
            peak = *equity;
            peak_idx = i;
        }
        let dd = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
            duration = (i - peak_idx) as u64;
        }
    }

    (max_dd, duration)
}

/// Drawdown fraction at every point of the curve.
pub fn drawdown_curve(equity_curve: &[(DateTime<Utc>, f64)]) -> Vec<(DateTime<Utc>, f64)> {
    let mut peak = f64::NEG_INFINITY;
    equity_curve
        .iter()
        .map(|(ts, equity)| {
            peak = peak.max(*equity);
            let dd = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
            (*ts, dd)
        })
        .collect()
}

#[derive(Debug, Default)]
struct TradeStats {
    winning: u32,
    losing: u32,
    win_rate: f64,
    avg_win: f64,
    avg_loss: f64,
    profit_factor: Option<f64>,
    expectancy: f64,
    avg_holding_bars: f64,
    best: f64,
    worst: f64,
}

fn trade_stats(trades: &[Trade]) -> TradeStats {
    if trades.is_empty() {
        return TradeStats::default();
    }

    let mut winning = 0u32;
    let mut losing = 0u32;
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    let mut total_pnl = 0.0;
    let mut total_bars = 0u64;
    let mut best = f64::MIN;
    let mut worst = f64::MAX;

    for trade in trades {
        if trade.pnl > 0.0 {
            winning += 1;
            gross_profit += trade.pnl;
        } else if trade.pnl < 0.0 {
            losing += 1;
            gross_loss += trade.pnl.abs();
        }
        total_pnl += trade.pnl;
        total_bars += trade.holding_bars;
        best = best.max(trade.pnl);
        worst = worst.min(trade.pnl);
    }

    let n = trades.len() as f64;
    TradeStats {
        winning,
        losing,
        win_rate: winning as f64 / n,
        avg_win: if winning > 0 {
            gross_profit / winning as f64
        } else {
            0.0
        },
        avg_loss: if losing > 0 {
            gross_loss / losing as f64
        } else {
            0.0
        },
        profit_factor: (gross_loss > 0.0).then(|| gross_profit / gross_loss),
        expectancy: total_pnl / n,
        avg_holding_bars: total_bars as f64 / n,
        best,
        worst,
    }
}
