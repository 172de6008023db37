use common::{Bar, Timeframe};

/// Resamples a base-timeframe stream into a coarser timeframe.
///
/// A bucket is emitted as soon as its last constituent base bar arrives, or
/// when a bar of a later bucket shows up first (gap in the data).
#[derive(Debug, Clone)]
pub struct BarAggregator {
    base: Timeframe,
    target: Timeframe,
    current: Option<Bar>,
}

impl BarAggregator {
    pub fn new(base: Timeframe, target: Timeframe) -> Self {
        Self {
            base,
            target,
            current: None,
        }
    }

    pub fn target(&self) -> Timeframe {
        self.target
    }

    /// Feed one base bar; returns the target bars closed by it, oldest first.
    pub fn push(&mut self, bar: &Bar) -> Vec<Bar> {
        let mut closed = Vec::new();
        let start = self.target.bucket_start(bar.timestamp);

        match self.current.as_mut() {
            Some(cur) if cur.timestamp == start => {
                cur.high = cur.high.max(bar.high);
                cur.low = cur.low.min(bar.low);
                cur.close = bar.close;
                cur.volume += bar.volume;
            }
            _ => {
                if let Some(prev) = self.current.take() {
                    closed.push(prev);
                }
                self.current = Some(Bar::new(
                    start, bar.open, bar.high, bar.low, bar.close, bar.volume,
                ));
            }
        }

        if bar.timestamp + self.base.duration() >= start + self.target.duration() {
            if let Some(done) = self.current.take() {
                closed.push(done);
            }
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn hourly(hour: i64, open: f64, close: f64) -> Bar {
        let ts = DateTime::from_timestamp(1_704_067_200, 0).unwrap() + Duration::hours(hour);
        Bar::new(ts, open, open.max(close) + 0.5, open.min(close) - 0.5, close, 10.0)
    }

    #[test]
    fn test_same_timeframe_passes_through() {
        let mut agg = BarAggregator::new(Timeframe::H1, Timeframe::H1);
        let bar = hourly(0, 100.0, 101.0);
        assert_eq!(agg.push(&bar), vec![bar]);
    }

    #[test]
    fn test_emits_on_last_constituent() {
        let mut agg = BarAggregator::new(Timeframe::H1, Timeframe::H4);
        assert!(agg.push(&hourly(0, 100.0, 101.0)).is_empty());
        assert!(agg.push(&hourly(1, 101.0, 103.0)).is_empty());
        assert!(agg.push(&hourly(2, 103.0, 99.0)).is_empty());
        let closed = agg.push(&hourly(3, 99.0, 100.0));

        assert_eq!(closed.len(), 1);
        let bar = &closed[0];
        assert_eq!(bar.timestamp, hourly(0, 0.0, 0.0).timestamp);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 103.5);
        assert_eq!(bar.low, 98.5);
        assert_eq!(bar.close, 100.0);
        assert_eq!(bar.volume, 40.0);
    }

    #[test]
    fn test_gap_flushes_partial_bucket() {
        let mut agg = BarAggregator::new(Timeframe::H1, Timeframe::H4);
        agg.push(&hourly(0, 100.0, 101.0));
        agg.push(&hourly(1, 101.0, 102.0));
        // hours 2-3 missing
        let closed = agg.push(&hourly(4, 102.0, 104.0));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close, 102.0);
        assert_eq!(closed[0].volume, 20.0);
    }
}
