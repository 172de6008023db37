use super::sma::{calculate_sma, RollingMean};

/// Calculate True Range for a single bar
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// True range of every bar; the first bar has no prior close and uses high - low.
pub fn calculate_true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut tr = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            tr.push(highs[0] - lows[0]);
        } else {
            tr.push(true_range(highs[i], lows[i], closes[i - 1]));
        }
    }
    tr
}

/// Average True Range as the simple rolling mean of true range.
pub fn calculate_atr(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> Vec<Option<f64>> {
    calculate_sma(&calculate_true_range(highs, lows, closes), period)
}

/// Incremental counterpart of [`calculate_atr`].
#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    mean: RollingMean,
    prev_close: Option<f64>,
}

impl AverageTrueRange {
    pub fn new(period: usize) -> Self {
        Self {
            mean: RollingMean::new(period),
            prev_close: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = match self.prev_close {
            Some(prev) => true_range(high, low, prev),
            None => high - low,
        };
        self.prev_close = Some(close);
        self.mean.push(tr)
    }

    pub fn value(&self) -> Option<f64> {
        self.mean.value()
    }

    pub fn reset(&mut self) {
        self.mean.reset();
        self.prev_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atr_basic() {
        let highs = vec![48.7, 48.72, 48.9, 48.87, 48.82, 49.05, 49.2, 49.35, 49.92, 50.19];
        let lows = vec![47.79, 48.14, 48.39, 48.37, 48.24, 48.64, 48.94, 48.86, 49.5, 49.87];
        let closes = vec![48.16, 48.61, 48.75, 48.63, 48.74, 49.03, 49.07, 49.32, 49.91, 50.13];

        let atr = calculate_atr(&highs, &lows, &closes, 5);

        assert_eq!(atr.len(), highs.len());
        assert!(atr[3].is_none());
        for v in &atr[4..] {
            assert!(v.unwrap() > 0.0);
        }

        let mut rolling = AverageTrueRange::new(5);
        for i in 0..highs.len() {
            assert_eq!(rolling.update(highs[i], lows[i], closes[i]), atr[i]);
        }
    }

    #[test]
    fn test_true_range() {
        let tr = true_range(50.0, 48.0, 49.0);
        // max(50-48, |50-49|, |48-49|) = 2
        assert_eq!(tr, 2.0);
    }

    #[test]
    fn test_true_range_gap_up() {
        let tr = true_range(52.0, 51.0, 48.0);
        // max(52-51, |52-48|, |51-48|) = 4
        assert_eq!(tr, 4.0);
    }
}
