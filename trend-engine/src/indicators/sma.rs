use std::collections::VecDeque;

/// Calculate Simple Moving Average
///
/// # Arguments
/// * `prices` - Slice of prices
/// * `period` - SMA period
///
/// # Returns
/// Vector of Option<f64>, None for values before enough data is available
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = prices.len();
    let mut sma = vec![None; n];

    if n < period || period == 0 {
        return sma;
    }

    let mut sum = 0.0;
    for &p in &prices[..period] {
        sum += p;
    }
    sma[period - 1] = Some(sum / period as f64);

    // Sliding window for subsequent values
    for i in period..n {
        sum = sum - prices[i - period] + prices[i];
        sma[i] = Some(sum / period as f64);
    }

    sma
}

/// Incremental simple moving average, O(1) per value.
///
/// Accumulates in the same order as [`calculate_sma`], so both paths agree
/// bit for bit.
#[derive(Debug, Clone)]
pub struct RollingMean {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingMean {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            values: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        }
    }

    /// Add a value; returns the mean once the window is full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.values.len() == self.period {
            let oldest = self.values.pop_front().unwrap_or(0.0);
            self.sum = self.sum - oldest + value;
        } else {
            self.sum += value;
        }
        self.values.push_back(value);
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        self.is_full().then(|| self.sum / self.period as f64)
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_basic() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let sma = calculate_sma(&prices, 3);

        assert_eq!(sma.len(), prices.len());
        assert!(sma[0].is_none());
        assert!(sma[1].is_none());
        assert_eq!(sma[2], Some(2.0)); // (1+2+3)/3
        assert_eq!(sma[3], Some(3.0)); // (2+3+4)/3
        assert_eq!(sma[9], Some(9.0)); // (8+9+10)/3
    }

    #[test]
    fn test_sma_period_larger_than_data() {
        let prices = vec![1.0, 2.0, 3.0];
        let sma = calculate_sma(&prices, 5);

        assert!(sma.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_rolling_matches_batch_exactly() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.37).sin() * 3.1).collect();
        let batch = calculate_sma(&prices, 7);

        let mut rolling = RollingMean::new(7);
        let incremental: Vec<Option<f64>> = prices.iter().map(|&p| rolling.push(p)).collect();

        assert_eq!(batch, incremental);
    }

    #[test]
    fn test_rolling_reset() {
        let mut rolling = RollingMean::new(2);
        rolling.push(1.0);
        rolling.push(3.0);
        assert_eq!(rolling.value(), Some(2.0));
        rolling.reset();
        assert!(rolling.is_empty());
        assert_eq!(rolling.push(5.0), None);
    }
}
