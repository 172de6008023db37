use std::collections::VecDeque;

/// Sample standard deviation of close-to-close percentage returns over
/// `window` returns, recomputed from scratch at every bar.
pub fn calculate_volatility(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut out = vec![None; n];
    if window < 2 {
        return out;
    }

    for i in window..n {
        let returns: Vec<f64> = (i + 1 - window..=i)
            .map(|j| pct_change(closes[j - 1], closes[j]))
            .collect();
        let mean = returns.iter().sum::<f64>() / window as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
        out[i] = Some(var.max(0.0).sqrt());
    }

    out
}

fn pct_change(prev: f64, cur: f64) -> f64 {
    if prev == 0.0 {
        0.0
    } else {
        (cur - prev) / prev
    }
}

/// Rolling return volatility maintained from running sums, O(1) per bar.
#[derive(Debug, Clone)]
pub struct ReturnVolatility {
    window: usize,
    returns: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    prev_close: Option<f64>,
}

impl ReturnVolatility {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            returns: VecDeque::with_capacity(window + 1),
            sum: 0.0,
            sum_sq: 0.0,
            prev_close: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;
        let r = pct_change(prev, close);

        if self.returns.len() == self.window {
            let old = self.returns.pop_front().unwrap_or(0.0);
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        self.returns.push_back(r);
        self.sum += r;
        self.sum_sq += r * r;

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.returns.len() < self.window {
            return None;
        }
        let n = self.window as f64;
        let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        Some(var.max(0.0).sqrt())
    }

    pub fn reset(&mut self) {
        self.returns.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.prev_close = None;
    }
}
