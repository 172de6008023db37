use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use common::{BacktestError, Bar, Result};

/// Fixed-capacity rolling buffer of bars, oldest first.
///
/// Bars are appended only as the replay cursor advances, so the window never
/// holds a bar later than the one currently being processed.
#[derive(Debug, Clone)]
pub struct BarWindow {
    capacity: usize,
    bars: VecDeque<Bar>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl BarWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
            last_timestamp: None,
        }
    }

    /// Append a bar, evicting the oldest once full. Bars that do not advance
    /// the clock are rejected and leave the window untouched.
    pub fn push(&mut self, bar: Bar) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if bar.timestamp == last {
                return Err(BacktestError::DuplicateTimestamp {
                    timestamp: bar.timestamp,
                });
            }
            if bar.timestamp < last {
                return Err(BacktestError::OutOfOrderBar {
                    timestamp: bar.timestamp,
                    last,
                });
            }
        }

        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.last_timestamp = Some(bar.timestamp);
        self.bars.push_back(bar);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bars.len() == self.capacity
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Bar `i` positions back from the latest (0 = latest).
    pub fn back(&self, i: usize) -> Option<&Bar> {
        self.bars.len().checked_sub(i + 1).and_then(|idx| self.bars.get(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    pub fn highest_high(&self) -> Option<f64> {
        self.bars.iter().map(|b| b.high).reduce(f64::max)
    }

    pub fn lowest_low(&self) -> Option<f64> {
        self.bars.iter().map(|b| b.low).reduce(f64::min)
    }

    /// High-low span of the window relative to the latest close.
    pub fn range_pct(&self) -> Option<f64> {
        let close = self.latest()?.close;
        if close == 0.0 {
            return None;
        }
        Some((self.highest_high()? - self.lowest_low()?) / close)
    }

    pub fn clear(&mut self) {
        self.bars.clear();
        self.last_timestamp = None;
    }
}
