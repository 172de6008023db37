//! Property tests for engine invariants.
//!
//! 1. Incremental indicators agree with a full recomputation
//! 2. Terminal order states absorb no further events
//! 3. Leverage tiers and position size caps
//! 4. Stop is taken before target when one bar reaches both

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use common::{
    Bar, ExitReason, OrderState, RiskLimits, Side, Signal, SignalAction, StrategyParams,
    Timeframe,
};
use trend_engine::indicators::{compute_snapshots, IndicatorEngine};
use trend_engine::orders::{Order, OrderEvent};
use trend_engine::portfolio::Portfolio;
use trend_engine::risk::{leverage_for, take_profit_ladder, PositionSizer, SizingOutcome};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Bars from per-bar returns and wick sizes; prices stay positive.
fn arb_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-0.05..0.05_f64, 0.0..0.02_f64), 30..120).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (ret, wick))| {
                let open = price;
                let close = price * (1.0 + ret);
                let high = open.max(close) * (1.0 + wick);
                let low = open.min(close) * (1.0 - wick);
                price = close;
                Bar::new(start() + Duration::hours(i as i64), open, high, low, close, 1_000.0)
            })
            .collect()
    })
}

fn arb_params() -> impl Strategy<Value = StrategyParams> {
    (2..6usize, 2..10usize, 2..12usize, 0.5..4.0_f64, 2..10usize, 2..10usize).prop_map(
        |(fast, extra, band_period, band_multiplier, rsi_period, volatility_window)| {
            StrategyParams {
                fast_window: fast,
                slow_window: fast + extra,
                band_period,
                band_multiplier,
                rsi_period,
                volatility_window,
                ..StrategyParams::default()
            }
        },
    )
}

fn arb_event() -> impl Strategy<Value = OrderEvent> {
    prop_oneof![
        (0.1..20.0_f64, 90.0..110.0_f64).prop_map(|(quantity, price)| OrderEvent::Fill {
            quantity,
            price,
            timestamp: start(),
        }),
        Just(OrderEvent::Cancel {
            timestamp: start(),
            reason: "test".to_string(),
        }),
        Just(OrderEvent::Reject {
            timestamp: start(),
            reason: "test".to_string(),
        }),
    ]
}

fn order(side: Side, size: f64, entry: f64, stop: f64) -> Order {
    Order::new(
        1,
        "TEST",
        side,
        size,
        entry,
        stop,
        take_profit_ladder(side, entry, stop),
        10.0,
        start(),
    )
}

fn entry_signal(price: f64) -> Signal {
    Signal {
        symbol: "TEST".to_string(),
        timeframe: Timeframe::H1,
        direction: common::Direction::Long,
        action: SignalAction::EnterLong,
        strength: 0.8,
        price,
        timestamp: start(),
        reason: String::new(),
    }
}

// ── 1. Batch / incremental equivalence ───────────────────────────────

proptest! {
    #[test]
    fn incremental_matches_recompute(bars in arb_bars(), params in arb_params()) {
        let batch = compute_snapshots(&bars, &params);
        let mut engine = IndicatorEngine::new(&params);

        for (bar, expected) in bars.iter().zip(batch.iter()) {
            let inc = engine.update(bar).ok();
            prop_assert_eq!(inc.is_some(), expected.is_some());
            if let (Some(a), Some(b)) = (inc, expected) {
                prop_assert_eq!(a.fast_ma, b.fast_ma);
                prop_assert_eq!(a.slow_ma, b.slow_ma);
                prop_assert_eq!(a.relation, b.relation);
                prop_assert_eq!(a.prior_relation, b.prior_relation);
                prop_assert_eq!(a.band, b.band);
                prop_assert_eq!(a.atr, b.atr);
                prop_assert_eq!(a.rsi, b.rsi);
                prop_assert!((a.volatility - b.volatility).abs() < 1e-9);
            }
        }
    }
}

// ── 2. Terminal states absorb nothing ────────────────────────────────

proptest! {
    #[test]
    fn terminal_state_is_final(events in prop::collection::vec(arb_event(), 1..12)) {
        let mut order = order(Side::Long, 10.0, 100.0, 98.0);
        let mut terminal: Option<OrderState> = None;

        for event in &events {
            let before = order.state();
            let outcome = order.apply(event);
            match terminal {
                Some(state) => {
                    prop_assert!(outcome.is_err());
                    prop_assert_eq!(order.state(), state);
                }
                None => {
                    if outcome.is_err() {
                        // Only a reject after a partial fill may fail here
                        prop_assert_eq!(before, OrderState::PartiallyFilled);
                        prop_assert_eq!(order.state(), before);
                    }
                    if order.is_terminal() {
                        terminal = Some(order.state());
                    }
                }
            }
            prop_assert!(order.filled_size() <= order.size);
        }

        // Any live order can still be driven to exactly one terminal state
        if !order.is_terminal() {
            let cancel = OrderEvent::Cancel { timestamp: start(), reason: "end".to_string() };
            prop_assert_eq!(order.apply(&cancel).unwrap(), OrderState::Cancelled);
        }
        prop_assert!(order.archive().is_ok());
    }
}

// ── 3. Leverage tiers and caps ───────────────────────────────────────

proptest! {
    #[test]
    fn leverage_follows_tiers(equity in 0.0..1_000_000.0_f64) {
        let limits = RiskLimits::default();
        let leverage = leverage_for(&limits.leverage_tiers, equity).unwrap();
        let expected = if equity < 10_000.0 {
            20.0
        } else if equity < 100_000.0 {
            10.0
        } else {
            5.0
        };
        prop_assert_eq!(leverage, expected);
    }

    #[test]
    fn size_respects_both_caps(
        equity in 100.0..500_000.0_f64,
        price in 1.0..50_000.0_f64,
        fraction in 0.01..1.0_f64,
    ) {
        let limits = RiskLimits { max_position_fraction: fraction, ..RiskLimits::default() };
        let mut sizer = PositionSizer::new(limits.clone());

        match sizer.decide(&entry_signal(price), equity) {
            SizingOutcome::Sized(order) => {
                let notional = order.size * price;
                let leverage = leverage_for(&limits.leverage_tiers, equity).unwrap();
                let risk_based = equity * limits.risk_per_trade / limits.stop_loss_pct;
                let expected = (fraction * equity).min(risk_based) * leverage;
                prop_assert!((notional - expected).abs() <= expected * 1e-9);
                prop_assert!(notional <= fraction * equity * leverage * (1.0 + 1e-12));
                prop_assert!(notional >= limits.min_order_notional);
                prop_assert!(order.stop_price < price);
            }
            SizingOutcome::BelowMinimum { notional } => {
                prop_assert!(notional < limits.min_order_notional);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }
}

// ── 4. Stop before target ────────────────────────────────────────────

proptest! {
    #[test]
    fn stop_wins_over_target_in_one_bar(
        entry in 50.0..150.0_f64,
        stop_pct in 0.005..0.05_f64,
        beyond in 0.0..0.05_f64,
        long in any::<bool>(),
    ) {
        let side = if long { Side::Long } else { Side::Short };
        let stop = entry * (1.0 - side.sign() * stop_pct);
        let order = order(side, 5.0, entry, stop);
        let target = order.take_profit_ladder[1].price;

        let mut portfolio = Portfolio::new(10_000.0, 0.0, 0.0, 0.03);
        portfolio.apply_entry_fill(&order, 5.0, entry, start(), 0);

        // One bar spanning both the stop and the second target
        let (high, low) = match side {
            Side::Long => (target * (1.0 + beyond), stop * (1.0 - beyond)),
            Side::Short => (stop * (1.0 + beyond), target * (1.0 - beyond)),
        };
        let bar = Bar::new(start() + Duration::hours(1), entry, high, low, entry, 1_000.0);

        let trade = portfolio.process_bar(&bar, 1).unwrap();
        prop_assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        prop_assert_eq!(trade.exits.len(), 1);
        prop_assert!(trade.pnl < 0.0);
    }
}
