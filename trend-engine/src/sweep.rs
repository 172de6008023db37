//! Parameter grid for batch sweeps.

use common::ParameterSet;
use serde::{Deserialize, Serialize};

/// Values to sweep; each list is crossed with the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ParameterGrid {
    pub fast_windows: Vec<usize>,
    pub slow_windows: Vec<usize>,
    pub band_periods: Vec<usize>,
    pub band_multipliers: Vec<f64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            fast_windows: vec![5, 9, 12],
            slow_windows: vec![21, 30, 50],
            band_periods: vec![10],
            band_multipliers: vec![2.0, 3.0],
        }
    }
}

impl ParameterGrid {
    /// Upper bound on the number of parameter sets, before skipping.
    pub fn size(&self) -> usize {
        self.fast_windows.len()
            * self.slow_windows.len()
            * self.band_periods.len()
            * self.band_multipliers.len()
    }

    /// Cross every list onto `base`, skipping combinations with fast >= slow.
    /// Order is deterministic: fast, slow, band period, multiplier.
    pub fn expand(&self, base: &ParameterSet) -> Vec<ParameterSet> {
        let mut sets = Vec::with_capacity(self.size());
        for &fast in &self.fast_windows {
            for &slow in &self.slow_windows {
                if fast >= slow {
                    continue;
                }
                for &period in &self.band_periods {
                    for &multiplier in &self.band_multipliers {
                        let name = format!("sma{fast}-{slow}_band{period}x{multiplier}");
                        sets.push(
                            base.clone()
                                .named(name)
                                .with_windows(fast, slow)
                                .with_band(period, multiplier),
                        );
                    }
                }
            }
        }
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_skips_fast_not_below_slow() {
        let grid = ParameterGrid {
            fast_windows: vec![5, 20],
            slow_windows: vec![10, 20],
            band_periods: vec![7],
            band_multipliers: vec![2.0, 3.5],
        };

        let sets = grid.expand(&ParameterSet::default());
        assert_eq!(grid.size(), 8);
        // (5,10) (5,20) x 2 multipliers; 20 is never below 10 or 20
        assert_eq!(sets.len(), 4);
        assert_eq!(sets[0].name, "sma5-10_band7x2");
        assert_eq!(sets[1].name, "sma5-10_band7x3.5");
        assert_eq!(sets[3].strategy.slow_window, 20);
        assert!(sets.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_expand_keeps_base_sections() {
        let base = ParameterSet::default().with_capital(50_000.0);
        let sets = ParameterGrid::default().expand(&base);

        assert!(!sets.is_empty());
        assert!(sets
            .iter()
            .all(|p| p.execution.initial_capital == 50_000.0 && p.risk == base.risk));
    }
}
