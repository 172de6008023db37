//! Single deterministic replay of one parameter set over one bar series.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{
    BacktestError, BacktestResult, Bar, ExitReason, OrderRecord, ParameterSet, Result,
    RunDiagnostics, RunStatus, Signal, SignalAction, Timeframe, Trade, RESULT_SCHEMA_VERSION,
};
use tracing::{debug, error, info, warn};

use crate::data::{BarAggregator, BarSeries, BarWindow};
use crate::execution::{ExecutionReport, ExecutionVenue, FillSimulator};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::metrics::{drawdown_curve, PerformanceAggregator};
use crate::orders::{Order, OrderEvent};
use crate::portfolio::Portfolio;
use crate::regime::{FeatureVector, RegimeClassifier};
use crate::risk::{PositionSizer, SizingOutcome};
use crate::signals::SignalGenerator;
use crate::timeframe::{SignalQuality, TimeframeSelector};

/// Shared cancellation flag, observed between bars.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Abort conditions for a run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    /// Wall-clock budget per run.
    pub timeout: Option<Duration>,
}

impl RunControl {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Backtest engine for one parameter set
pub struct BacktestEngine {
    params: ParameterSet,
}

impl BacktestEngine {
    /// Validates the parameters up front.
    pub fn new(params: ParameterSet) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Replay `series` to completion.
    pub fn run(&self, series: &BarSeries) -> Result<BacktestResult> {
        self.run_with(series, &RunControl::default())
    }

    /// Replay `series`, checking `control` before every bar. An aborted run
    /// still returns a result, tagged with the abort status.
    pub fn run_with(&self, series: &BarSeries, control: &RunControl) -> Result<BacktestResult> {
        let started = Instant::now();
        let deadline = control.timeout.map(|t| started + t);

        if series.timeframe != self.params.timeframes.base {
            return Err(BacktestError::InvalidConfiguration(format!(
                "series timeframe {} does not match base timeframe {}",
                series.timeframe, self.params.timeframes.base
            )));
        }

        info!(
            name = %self.params.name,
            symbol = %series.symbol,
            bars = series.len(),
            "Backtest started"
        );

        let mut replay = Replay::new(&self.params, &series.symbol);
        let mut status = RunStatus::Completed;

        for bar in series.bars.iter() {
            if control.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                status = RunStatus::TimedOut;
                break;
            }

            if let Err(e) = replay.step(bar) {
                error!(name = %self.params.name, error = %e, "Backtest failed");
                return Err(e);
            }
        }

        if status.is_aborted() {
            warn!(name = %self.params.name, ?status, bars = replay.diagnostics.bars_processed, "Backtest aborted");
        }

        let result = replay.finish(status)?;
        info!(
            name = %self.params.name,
            trades = result.trades.len(),
            final_equity = result.final_equity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backtest finished"
        );
        Ok(result)
    }
}

/// Pipeline for one candidate timeframe.
struct Track {
    timeframe: Timeframe,
    aggregator: BarAggregator,
    window: BarWindow,
    indicators: IndicatorEngine,
    snapshot: Option<IndicatorSnapshot>,
    closed_now: bool,
}

/// Mutable state of one run. Nothing here is shared with other runs.
struct Replay<'a> {
    params: &'a ParameterSet,
    symbol: String,
    base_window: BarWindow,
    tracks: Vec<Track>,
    classifier: RegimeClassifier,
    selector: TimeframeSelector,
    quality: SignalQuality,
    generator: SignalGenerator,
    sizer: PositionSizer,
    venue: FillSimulator,
    portfolio: Portfolio,
    orders: Vec<OrderRecord>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
    diagnostics: RunDiagnostics,
    last_bar: Option<Bar>,
}

impl<'a> Replay<'a> {
    fn new(params: &'a ParameterSet, symbol: &str) -> Self {
        let tf = &params.timeframes;
        let window = params.strategy.slow_window;
        let tracks = tf
            .candidates
            .iter()
            .map(|&timeframe| Track {
                timeframe,
                aggregator: BarAggregator::new(tf.base, timeframe),
                window: BarWindow::new(window),
                indicators: IndicatorEngine::new(&params.strategy),
                snapshot: None,
                closed_now: false,
            })
            .collect();

        Self {
            params,
            symbol: symbol.to_string(),
            base_window: BarWindow::new(window),
            tracks,
            classifier: RegimeClassifier::from_spec(&params.classifier),
            selector: TimeframeSelector::new(tf.candidates.clone(), tf.hysteresis_bars),
            quality: SignalQuality::new(tf.quality_window),
            generator: SignalGenerator::new(symbol, &params.strategy),
            sizer: PositionSizer::new(params.risk.clone()),
            venue: FillSimulator::new(params.execution.clone()),
            portfolio: Portfolio::new(
                params.execution.initial_capital,
                params.execution.fee_rate,
                params.execution.slippage_pct,
                params.risk.trailing_stop_pct,
            ),
            orders: Vec::new(),
            equity_curve: Vec::new(),
            diagnostics: RunDiagnostics::default(),
            last_bar: None,
        }
    }

    fn step(&mut self, bar: &Bar) -> Result<()> {
        if let Err(e) = self.admit(bar) {
            if e.is_skippable_bar() {
                warn!(timestamp = %bar.timestamp, error = %e, "Skipping bar");
                self.diagnostics.bars_skipped += 1;
                return Ok(());
            }
            return Err(e);
        }
        let idx = self.diagnostics.bars_processed;
        self.diagnostics.bars_processed += 1;
        self.last_bar = Some(bar.clone());

        // Day rollover sees the equity carried in from the previous bar
        self.sizer.observe_equity(bar.timestamp, self.portfolio.equity());

        for report in self.venue.poll(bar)? {
            self.on_report(report, idx)?;
        }
        if let Some(trade) = self.portfolio.process_bar(bar, idx) {
            self.on_trade_closed(&trade, bar.timestamp)?;
        }

        self.portfolio.mark(bar.close);
        let equity = self.portfolio.equity();
        self.sizer.observe_equity(bar.timestamp, equity);
        self.equity_curve.push((bar.timestamp, equity));

        for track in self.tracks.iter_mut() {
            track.closed_now = false;
            for closed in track.aggregator.push(bar) {
                track.window.push(closed.clone())?;
                track.snapshot = track.indicators.update(&closed).ok();
                track.closed_now = true;
            }
        }

        for i in 0..self.tracks.len() {
            if self.tracks[i].closed_now && self.selector.on_bar_close(self.tracks[i].timeframe) {
                self.diagnostics.timeframe_switches += 1;
                info!(timeframe = %self.tracks[i].timeframe, at = %bar.timestamp, "Switched timeframe");
            }
        }

        let active = self.selector.active();
        let ready = self
            .tracks
            .iter()
            .find(|t| t.timeframe == active && t.closed_now)
            .and_then(|t| {
                t.snapshot
                    .as_ref()
                    .map(|s| (FeatureVector::from_snapshot(s, &t.window), s.clone()))
            });

        if let Some((features, snapshot)) = ready {
            let regime = self.classifier.classify(&features)?;
            self.diagnostics.regimes.record(regime);
            self.selector.select(regime, self.quality.score());

            let signal = self.generator.evaluate(&snapshot, &snapshot.band, regime, active);
            self.diagnostics.signals_evaluated += 1;
            if signal.action != SignalAction::Hold {
                debug!(
                    action = ?signal.action,
                    strength = signal.strength,
                    price = signal.price,
                    ?regime,
                    reason = %signal.reason,
                    "Signal"
                );
            }
            self.on_signal(&signal, bar, idx)?;
        }

        Ok(())
    }

    /// Base bars must sit on the base grid; resampling re-stamps them to
    /// bucket starts and an off-grid bar would collide with its neighbour.
    fn admit(&mut self, bar: &Bar) -> Result<()> {
        let base = self.params.timeframes.base;
        if !base.is_aligned(bar.timestamp) {
            return Err(BacktestError::MisalignedBar {
                timestamp: bar.timestamp,
                timeframe: base,
            });
        }
        self.base_window.push(bar.clone())
    }

    fn on_signal(&mut self, signal: &Signal, bar: &Bar, idx: u64) -> Result<()> {
        if let Some(side) = signal.action.exit_side() {
            self.diagnostics.exit_signals += 1;
            self.cancel_open_orders(|o| o.side == side, bar.timestamp, "exit signal")?;
            if self.portfolio.position().map(|p| p.side) == Some(side) {
                if let Some(trade) =
                    self.portfolio
                        .close_position(bar.close, bar.timestamp, idx, ExitReason::Signal)
                {
                    self.on_trade_closed(&trade, bar.timestamp)?;
                }
            }
            return Ok(());
        }

        let side = match signal.action.entry_side() {
            Some(side) => side,
            None => return Ok(()),
        };
        self.diagnostics.entry_signals += 1;

        if self.portfolio.position().map(|p| p.side) == Some(side)
            || self.venue.open_orders().iter().any(|o| o.side == side)
        {
            return Ok(());
        }
        self.cancel_open_orders(|o| o.side != side, bar.timestamp, "reversal")?;
        if self.portfolio.position().is_some() {
            if let Some(trade) =
                self.portfolio
                    .close_position(bar.close, bar.timestamp, idx, ExitReason::Reversal)
            {
                self.on_trade_closed(&trade, bar.timestamp)?;
            }
        }

        match self.sizer.decide(signal, self.portfolio.equity()) {
            SizingOutcome::Sized(order) => {
                self.venue.submit(order);
                self.diagnostics.orders_submitted += 1;
            }
            outcome => {
                debug!(?outcome, "Entry suppressed");
                self.diagnostics.orders_suppressed += 1;
                if outcome == SizingOutcome::DailyLossLimitBreached {
                    self.diagnostics.suppressed_by_daily_limit += 1;
                }
            }
        }
        Ok(())
    }

    fn on_report(&mut self, report: ExecutionReport, idx: u64) -> Result<()> {
        if let OrderEvent::Fill {
            quantity,
            price,
            timestamp,
        } = report.event
        {
            self.portfolio
                .apply_entry_fill(&report.order, quantity, price, timestamp, idx);
        }
        if report.order.is_terminal() {
            self.orders.push(report.order.archive()?);
        }
        Ok(())
    }

    fn on_trade_closed(&mut self, trade: &Trade, timestamp: DateTime<Utc>) -> Result<()> {
        debug!(
            order_id = trade.order_id,
            pnl = trade.pnl,
            reason = ?trade.exit_reason,
            "Trade closed"
        );
        self.quality.record(trade.pnl > 0.0);
        self.sizer.record_trade(trade.pnl);
        let order_id = trade.order_id;
        self.cancel_open_orders(|o| o.id == order_id, timestamp, "position closed")
    }

    fn cancel_open_orders<F>(
        &mut self,
        filter: F,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<()>
    where
        F: Fn(&Order) -> bool,
    {
        let ids: Vec<u64> = self
            .venue
            .open_orders()
            .into_iter()
            .filter(|o| filter(*o))
            .map(|o| o.id)
            .collect();
        for id in ids {
            if let Some(report) = self.venue.cancel(id, timestamp, reason)? {
                self.orders.push(report.order.archive()?);
            }
        }
        Ok(())
    }

    fn finish(mut self, status: RunStatus) -> Result<BacktestResult> {
        if let Some(bar) = self.last_bar.clone() {
            let idx = self.diagnostics.bars_processed.saturating_sub(1);
            let (reason, note) = if status.is_aborted() {
                (ExitReason::RunAborted, "run aborted")
            } else {
                (ExitReason::EndOfData, "end of data")
            };
            self.cancel_open_orders(|_| true, bar.timestamp, note)?;
            if let Some(trade) = self
                .portfolio
                .close_position(bar.close, bar.timestamp, idx, reason)
            {
                self.on_trade_closed(&trade, bar.timestamp)?;
            }
            if let Some(last) = self.equity_curve.last_mut() {
                last.1 = self.portfolio.equity();
            }
        }

        self.diagnostics.final_timeframe = Some(self.selector.active());
        let execution = &self.params.execution;
        let aggregator =
            PerformanceAggregator::new(execution.initial_capital, self.params.timeframes.base);
        let final_equity = self.portfolio.equity();
        let trades = self.portfolio.into_trades();
        let summary_stats = aggregator.summarize(&trades, &self.equity_curve);
        let drawdown_curve = drawdown_curve(&self.equity_curve);

        Ok(BacktestResult {
            schema_version: RESULT_SCHEMA_VERSION,
            parameter_set: self.params.clone(),
            symbol: self.symbol,
            status,
            summary_stats,
            equity_curve: self.equity_curve,
            drawdown_curve,
            trades,
            orders: self.orders,
            diagnostics: self.diagnostics,
            initial_capital: execution.initial_capital,
            final_equity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{ClassifierSpec, LinearModel, Side};

    use crate::data::{generate_random_walk, generate_trend_legs, TrendLeg};
    use crate::regime::FEATURE_COUNT;

    fn scripted() -> (ParameterSet, BarSeries) {
        let mut params = ParameterSet::default()
            .named("scripted")
            .with_windows(3, 8)
            .with_band(5, 1.5)
            .with_min_strength(0.0);
        params.strategy.rsi_period = 5;
        params.strategy.volatility_window = 5;
        params.risk.stop_loss_pct = 0.2;
        params.risk.leverage_tiers = vec![common::LeverageTier::new(0.0, 1.0)];

        let legs = [
            TrendLeg::new(10, -0.5),
            TrendLeg::new(14, 1.2),
            TrendLeg::new(6, -1.0),
            TrendLeg::new(14, 1.2),
            TrendLeg::new(6, -0.6),
        ];
        let bars = generate_trend_legs(100.0, Timeframe::H1, &legs, 0.25);
        (params, BarSeries::new("TEST", Timeframe::H1, bars))
    }

    #[test]
    fn test_rejects_mismatched_base_timeframe() {
        let (params, series) = scripted();
        let series = BarSeries::new("TEST", Timeframe::M15, series.bars.to_vec());
        let err = BacktestEngine::new(params).unwrap().run(&series).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_parameters_fail_before_any_bar() {
        let (params, _) = scripted();
        let err = BacktestEngine::new(params.with_windows(8, 3)).err().unwrap();
        assert!(matches!(err, BacktestError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_empty_series() {
        let (params, _) = scripted();
        let series = BarSeries::new("TEST", Timeframe::H1, Vec::new());
        let result = BacktestEngine::new(params).unwrap().run(&series).unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.trades.is_empty());
        assert!(result.equity_curve.is_empty());
        assert_eq!(result.final_equity, result.initial_capital);
    }

    #[test]
    fn test_abort_flattens_open_position() {
        let (params, series) = scripted();
        let mut replay = Replay::new(&params, &series.symbol);
        // The first long is filled on bar 13 and still open on bar 20
        for bar in series.bars.iter().take(20) {
            replay.step(bar).unwrap();
        }
        assert_eq!(replay.portfolio.position().map(|p| p.side), Some(Side::Long));

        let result = replay.finish(RunStatus::Cancelled).unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.diagnostics.bars_processed, 20);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::RunAborted);
        assert_eq!(result.trades[0].exit_date, series.bars[19].timestamp);
        let last = result.equity_curve.last().unwrap().1;
        assert_eq!(last, result.final_equity);
    }

    #[test]
    fn test_cancelled_token_stops_before_first_bar() {
        let (params, series) = scripted();
        let control = RunControl::default();
        control.cancel.cancel();

        let result = BacktestEngine::new(params)
            .unwrap()
            .run_with(&series, &control)
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.diagnostics.bars_processed, 0);
    }

    #[test]
    fn test_off_grid_bar_is_skipped() {
        let (params, series) = scripted();
        let clean = BacktestEngine::new(params.clone()).unwrap().run(&series).unwrap();

        // 05:30 in an hourly series would resample onto the 05:00 bar
        let mut bars = series.bars.to_vec();
        let mut stray = bars[5].clone();
        stray.timestamp = stray.timestamp + ChronoDuration::minutes(30);
        bars.insert(6, stray);
        let noisy = BarSeries::new("TEST", Timeframe::H1, bars);

        let result = BacktestEngine::new(params).unwrap().run(&noisy).unwrap();
        assert_eq!(result.diagnostics.bars_skipped, 1);
        assert_eq!(result.diagnostics.bars_processed, 50);
        assert_eq!(result.trades, clean.trades);
        assert_eq!(result.equity_curve, clean.equity_curve);
    }

    #[test]
    fn test_misaligned_bar_error_is_skippable() {
        let (params, series) = scripted();
        let mut replay = Replay::new(&params, &series.symbol);
        let mut bar = series.bars[0].clone();
        bar.timestamp = bar.timestamp + ChronoDuration::minutes(1);

        let err = replay.admit(&bar).unwrap_err();
        assert!(matches!(err, BacktestError::MisalignedBar { .. }));
        assert!(err.is_skippable_bar());
        assert!(replay.base_window.is_empty());
    }

    #[test]
    fn test_timeframe_switch_waits_for_target_bar_close() {
        let mut params = ParameterSet::default()
            .with_windows(3, 5)
            .with_band(3, 2.0)
            .with_min_strength(1.0)
            .with_timeframes(
                Timeframe::M15,
                vec![Timeframe::M15, Timeframe::H1, Timeframe::H4],
            )
            .with_hysteresis(2)
            // always trending, which maps to the middle candidate
            .with_classifier(ClassifierSpec::Linear(LinearModel {
                weights: vec![vec![0.0; FEATURE_COUNT]; 3],
                bias: vec![1.0, 0.0, 0.0],
                min_margin: 0.0,
                adaptive: false,
            }));
        params.strategy.rsi_period = 3;
        params.strategy.volatility_window = 3;
        let bars = generate_random_walk(160, 100.0, Timeframe::M15, 3);

        let closes_hour =
            |bar: &Bar| Timeframe::H1.is_aligned(bar.timestamp + Timeframe::M15.duration());

        let mut replay = Replay::new(&params, "TEST");
        let mut switched_at = None;
        let mut deferred = 0;
        let mut evaluations_before_switch = 0;
        let mut evaluations_after_switch = 0;

        for (i, bar) in bars.iter().enumerate() {
            let before = replay.diagnostics.signals_evaluated;
            replay.step(bar).unwrap();
            let evaluated = replay.diagnostics.signals_evaluated > before;

            match switched_at {
                None if replay.selector.active() == Timeframe::H1 => {
                    assert!(closes_hour(bar), "switched on bar {} which closes no 1h bar", i);
                    // the 1h track is still warming up when the switch lands
                    assert!(!evaluated);
                    switched_at = Some(i);
                }
                None => {
                    assert_eq!(replay.selector.active(), Timeframe::M15);
                    if replay.selector.pending() == Some(Timeframe::H1) {
                        deferred += 1;
                    }
                    if evaluated {
                        evaluations_before_switch += 1;
                    }
                }
                Some(_) => {
                    assert_eq!(replay.selector.active(), Timeframe::H1);
                    if evaluated {
                        assert!(closes_hour(bar), "1h signal evaluated on bar {}", i);
                        evaluations_after_switch += 1;
                    }
                }
            }
        }

        assert!(switched_at.is_some());
        assert!(deferred >= 1);
        assert!(evaluations_before_switch >= 2);
        assert!(evaluations_after_switch > 0);
        assert_eq!(replay.diagnostics.timeframe_switches, 1);

        let result = replay.finish(RunStatus::Completed).unwrap();
        assert_eq!(result.diagnostics.final_timeframe, Some(Timeframe::H1));
        assert!(result.trades.is_empty());
    }
}
