use std::collections::VecDeque;

use common::{Regime, Timeframe};

/// Below this recent win fraction the selector leans one step slower.
pub const LOW_QUALITY: f64 = 0.4;

/// Win fraction of the most recent closed trades.
#[derive(Debug, Clone)]
pub struct SignalQuality {
    window: usize,
    outcomes: VecDeque<bool>,
}

impl SignalQuality {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            outcomes: VecDeque::with_capacity(window),
        }
    }

    pub fn record(&mut self, win: bool) {
        if self.outcomes.len() == self.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(win);
    }

    /// 0.5 until a trade has closed.
    pub fn score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.5;
        }
        let wins = self.outcomes.iter().filter(|w| **w).count();
        wins as f64 / self.outcomes.len() as f64
    }
}

/// Chooses the timeframe that drives signal generation.
///
/// A regime must be reported `hysteresis` times in a row before its
/// timeframe is scheduled. A scheduled timeframe only becomes active when a
/// later bar of that timeframe closes.
#[derive(Debug, Clone)]
pub struct TimeframeSelector {
    candidates: Vec<Timeframe>,
    hysteresis: usize,
    active: Timeframe,
    pending: Option<Timeframe>,
    streak_regime: Option<Regime>,
    streak: usize,
}

impl TimeframeSelector {
    /// `candidates` must be non-empty and ascending; the first one starts active.
    pub fn new(candidates: Vec<Timeframe>, hysteresis: usize) -> Self {
        let active = candidates.first().copied().unwrap_or(Timeframe::H1);
        Self {
            candidates,
            hysteresis: hysteresis.max(1),
            active,
            pending: None,
            streak_regime: None,
            streak: 0,
        }
    }

    pub fn active(&self) -> Timeframe {
        self.active
    }

    pub fn pending(&self) -> Option<Timeframe> {
        self.pending
    }

    pub fn candidates(&self) -> &[Timeframe] {
        &self.candidates
    }

    /// Timeframe a regime calls for, before hysteresis.
    pub fn preferred(&self, regime: Regime, quality: f64) -> Timeframe {
        let last = self.candidates.len().saturating_sub(1);
        let mut idx = match regime {
            Regime::Volatile => 0,
            Regime::Trending => self.candidates.len() / 2,
            Regime::Ranging => last,
            Regime::Unknown => return self.active,
        };
        if quality < LOW_QUALITY {
            idx = (idx + 1).min(last);
        }
        self.candidates.get(idx).copied().unwrap_or(self.active)
    }

    /// Record one evaluation and return the selected timeframe: the pending
    /// one if a switch is scheduled, else the active one.
    pub fn select(&mut self, regime: Regime, quality: f64) -> Timeframe {
        if self.streak_regime == Some(regime) {
            self.streak += 1;
        } else {
            self.streak_regime = Some(regime);
            self.streak = 1;
        }

        let target = self.preferred(regime, quality);
        if target == self.active {
            self.pending = None;
        } else if self.streak >= self.hysteresis {
            self.pending = Some(target);
        }

        self.pending.unwrap_or(self.active)
    }

    /// A bar of `timeframe` closed. Activates the pending timeframe if it is
    /// this one; returns whether a switch happened.
    pub fn on_bar_close(&mut self, timeframe: Timeframe) -> bool {
        if self.pending == Some(timeframe) {
            self.active = timeframe;
            self.pending = None;
            true
        } else {
            false
        }
    }
}
