use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ParameterSet;

/// Version of the `BacktestResult` artifact layout.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// OHLCV bar data. `timestamp` is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Midpoint of the bar range.
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Bar interval. Candidates are kept in ascending order of duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn seconds(self) -> i64 {
        self.minutes() * 60
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Open time of the bucket of this timeframe containing `ts`.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let offset = secs.rem_euclid(self.seconds());
        ts - Duration::seconds(offset)
    }

    /// Whether `ts` falls exactly on a bar boundary of this timeframe.
    pub fn is_aligned(self, ts: DateTime<Utc>) -> bool {
        ts.timestamp().rem_euclid(self.seconds()) == 0
    }

    /// Bars per year for a market that trades around the clock.
    pub fn periods_per_year(self) -> f64 {
        525_600.0 / self.minutes() as f64
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.label() == label)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Market regime label produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
    Unknown,
}

/// Desired exposure carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

/// What the signal asks the pipeline to do this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
    Hold,
}

impl SignalAction {
    pub fn direction(self) -> Direction {
        match self {
            SignalAction::EnterLong => Direction::Long,
            SignalAction::EnterShort => Direction::Short,
            _ => Direction::Flat,
        }
    }

    pub fn entry_side(self) -> Option<Side> {
        match self {
            SignalAction::EnterLong => Some(Side::Long),
            SignalAction::EnterShort => Some(Side::Short),
            _ => None,
        }
    }

    /// Side of an open position this action closes.
    pub fn exit_side(self) -> Option<Side> {
        match self {
            SignalAction::ExitLong => Some(Side::Long),
            SignalAction::ExitShort => Some(Side::Short),
            _ => None,
        }
    }
}

/// Trading signal, one per evaluated bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub action: SignalAction,
    pub strength: f64,
    /// Reference price (close of the evaluated bar).
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Position side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Fraction of the original order size closed at this rung.
    pub fraction: f64,
    pub price: f64,
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::Pending => "Pending",
            OrderState::PartiallyFilled => "PartiallyFilled",
            OrderState::Filled => "Filled",
            OrderState::Rejected => "Rejected",
            OrderState::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Archived order, written once the order reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub filled_size: f64,
    pub avg_fill_price: Option<f64>,
    pub entry_price: f64,
    pub stop_price: f64,
    pub take_profit_ladder: Vec<TakeProfitLevel>,
    pub leverage: f64,
    pub final_state: OrderState,
    pub created_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Why (part of) a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TrailingStop,
    Signal,
    Reversal,
    EndOfData,
    RunAborted,
}

/// A single (partial) exit fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitFill {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub reason: ExitReason,
    pub pnl: f64,
}

/// Round-trip record, materialized when a filled order's position is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub pnl: f64,
    /// Return on margin, in percent.
    pub pnl_pct: f64,
    pub fees: f64,
    pub holding_bars: u64,
    pub exit_reason: ExitReason,
    pub exits: Vec<ExitFill>,
}

/// Summary statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    // Returns
    pub total_return: f64,
    pub total_return_pct: f64,
    // Risk metrics
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Fraction of the running peak, in [0, 1].
    pub max_drawdown: f64,
    pub max_drawdown_duration_bars: u64,
    // Trade statistics
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Fraction in [0, 1].
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// `None` when there are no losing trades.
    pub profit_factor: Option<f64>,
    pub expectancy: f64,
    pub avg_holding_bars: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    TimedOut,
}

impl RunStatus {
    pub fn is_aborted(self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

/// Per-regime classification counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeCounts {
    pub trending: u64,
    pub ranging: u64,
    pub volatile: u64,
    pub unknown: u64,
}

impl RegimeCounts {
    pub fn record(&mut self, regime: Regime) {
        match regime {
            Regime::Trending => self.trending += 1,
            Regime::Ranging => self.ranging += 1,
            Regime::Volatile => self.volatile += 1,
            Regime::Unknown => self.unknown += 1,
        }
    }
}

/// Counters collected while replaying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub bars_processed: u64,
    pub bars_skipped: u64,
    pub signals_evaluated: u64,
    pub entry_signals: u64,
    pub exit_signals: u64,
    pub orders_submitted: u64,
    pub orders_suppressed: u64,
    pub suppressed_by_daily_limit: u64,
    pub timeframe_switches: u64,
    pub final_timeframe: Option<Timeframe>,
    pub regimes: RegimeCounts,
}

/// Backtest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub schema_version: u32,
    pub parameter_set: ParameterSet,
    pub symbol: String,
    pub status: RunStatus,
    pub summary_stats: SummaryStats,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub drawdown_curve: Vec<(DateTime<Utc>, f64)>,
    pub trades: Vec<Trade>,
    pub orders: Vec<OrderRecord>,
    pub diagnostics: RunDiagnostics,
    pub initial_capital: f64,
    pub final_equity: f64,
}
