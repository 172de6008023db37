use super::sma::{calculate_sma, RollingMean};

/// RSI from average gain and loss. A window without losses reads 100, a
/// window without any movement reads 50.
pub fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Calculate RSI with simple rolling means of gains and losses
///
/// # Returns
/// Vector of RSI values, None until `period` price changes are available
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = prices.len();
    let mut rsi = vec![None; n];
    if n < 2 {
        return rsi;
    }

    let mut gains = Vec::with_capacity(n - 1);
    let mut losses = Vec::with_capacity(n - 1);
    for i in 1..n {
        let delta = prices[i] - prices[i - 1];
        gains.push(if delta > 0.0 { delta } else { 0.0 });
        losses.push(if delta < 0.0 { -delta } else { 0.0 });
    }

    let avg_gains = calculate_sma(&gains, period);
    let avg_losses = calculate_sma(&losses, period);
    for i in 1..n {
        if let (Some(g), Some(l)) = (avg_gains[i - 1], avg_losses[i - 1]) {
            rsi[i] = Some(rsi_from_averages(g, l));
        }
    }

    rsi
}

/// Incremental counterpart of [`calculate_rsi`].
#[derive(Debug, Clone)]
pub struct RollingRsi {
    gains: RollingMean,
    losses: RollingMean,
    prev_close: Option<f64>,
}

impl RollingRsi {
    pub fn new(period: usize) -> Self {
        Self {
            gains: RollingMean::new(period),
            losses: RollingMean::new(period),
            prev_close: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;
        let delta = close - prev;
        let gain = self.gains.push(if delta > 0.0 { delta } else { 0.0 });
        let loss = self.losses.push(if delta < 0.0 { -delta } else { 0.0 });
        Some(rsi_from_averages(gain?, loss?))
    }

    pub fn reset(&mut self) {
        self.gains.reset();
        self.losses.reset();
        self.prev_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_basic() {
        let prices = vec![44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.0, 43.5, 44.25, 44.5];
        let rsi = calculate_rsi(&prices, 2);

        assert_eq!(rsi.len(), prices.len());
        assert!(rsi[0].is_none());
        assert!(rsi[1].is_none());
        // gains [0.25, 0.25] losses [0, 0]
        assert_eq!(rsi[2], Some(100.0));
        // gains [0.25, 0] losses [0, 0.75] -> rs = 1/3
        assert!((rsi[3].unwrap() - 25.0).abs() < 1e-12);
        for val in rsi.iter().flatten() {
            assert!(*val >= 0.0 && *val <= 100.0);
        }
    }

    #[test]
    fn test_rsi_all_losses() {
        let prices = vec![15.0, 14.0, 13.0, 12.0, 11.0, 10.0];
        let rsi = calculate_rsi(&prices, 2);
        assert_eq!(rsi[rsi.len() - 1], Some(0.0));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let rsi = calculate_rsi(&[10.0; 6], 3);
        assert_eq!(rsi[5], Some(50.0));
    }

    #[test]
    fn test_rolling_matches_batch() {
        let prices: Vec<f64> = (0..120).map(|i| 50.0 + (i as f64 * 0.61).cos() * 2.0).collect();
        let batch = calculate_rsi(&prices, 14);
        let mut rolling = RollingRsi::new(14);
        for (i, &p) in prices.iter().enumerate() {
            assert_eq!(rolling.update(p), batch[i]);
        }
    }
}
