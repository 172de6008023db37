//! Regime classification behind a fixed feature-vector contract.
//!
//! The model is a read-only capability. Any online adaptation lives in the
//! per-run [`RegimeClassifier`], never in the model itself.

use std::fmt;

use common::{BacktestError, ClassifierSpec, LinearModel, Regime, Result, RuleThresholds};

use crate::data::BarWindow;
use crate::indicators::IndicatorSnapshot;

/// Length of the feature vector built by [`FeatureVector::from_snapshot`].
pub const FEATURE_COUNT: usize = 6;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "trend_strength",
    "volatility",
    "atr_pct",
    "rsi",
    "band_distance",
    "range_pct",
];

const TREND_STRENGTH: usize = 0;
const VOLATILITY: usize = 1;

/// Ordered numeric features for one evaluated bar.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn from_snapshot(snapshot: &IndicatorSnapshot, window: &BarWindow) -> Self {
        let atr_pct = if snapshot.close == 0.0 {
            0.0
        } else {
            snapshot.atr / snapshot.close
        };
        Self(vec![
            snapshot.trend_strength(),
            snapshot.volatility,
            atr_pct,
            snapshot.rsi / 100.0,
            snapshot.band_distance(),
            window.range_pct().unwrap_or(0.0),
        ])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Predictor with a fixed input width.
pub trait RegimeModel: Send + Sync + fmt::Debug {
    fn expected_features(&self) -> usize;

    /// Label for a feature vector of `expected_features()` values; missing
    /// or non-finite inputs give `Unknown`.
    fn predict(&self, features: &[f64]) -> Regime;
}

/// Threshold rules on return volatility and MA spread.
#[derive(Debug, Clone)]
pub struct RuleModel {
    thresholds: RuleThresholds,
}

impl RuleModel {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }
}

impl RegimeModel for RuleModel {
    fn expected_features(&self) -> usize {
        FEATURE_COUNT
    }

    fn predict(&self, features: &[f64]) -> Regime {
        let (trend, vol) = match (features.get(TREND_STRENGTH), features.get(VOLATILITY)) {
            (Some(&trend), Some(&vol)) if trend.is_finite() && vol.is_finite() => (trend, vol),
            _ => return Regime::Unknown,
        };

        let t = &self.thresholds;
        if vol >= t.volatile_volatility {
            Regime::Volatile
        } else if vol < t.ranging_volatility && trend < t.trend_strength {
            Regime::Ranging
        } else {
            Regime::Trending
        }
    }
}

const LINEAR_LABELS: [Regime; 3] = [Regime::Trending, Regime::Ranging, Regime::Volatile];

/// Arg-max over one linear score per regime.
#[derive(Debug, Clone)]
pub struct LinearRegimeModel {
    model: LinearModel,
}

impl LinearRegimeModel {
    pub fn new(model: LinearModel) -> Self {
        Self { model }
    }
}

impl RegimeModel for LinearRegimeModel {
    fn expected_features(&self) -> usize {
        self.model.weights.first().map_or(0, Vec::len)
    }

    fn predict(&self, features: &[f64]) -> Regime {
        if features.iter().any(|v| !v.is_finite()) {
            return Regime::Unknown;
        }

        let scores: Vec<f64> = self
            .model
            .weights
            .iter()
            .zip(&self.model.bias)
            .map(|(row, bias)| {
                row.iter()
                    .zip(features)
                    .fold(*bias, |acc, (w, x)| acc + w * x)
            })
            .collect();

        // Earlier label wins an exact tie
        let mut best = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] {
                best = i;
            }
        }
        let runner_up = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best)
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);

        let top = match scores.get(best) {
            Some(score) => *score,
            None => return Regime::Unknown,
        };
        if top - runner_up < self.model.min_margin {
            Regime::Unknown
        } else {
            LINEAR_LABELS.get(best).copied().unwrap_or(Regime::Unknown)
        }
    }
}

/// Online per-feature standardization (Welford).
#[derive(Debug, Clone)]
struct FeatureScaler {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl FeatureScaler {
    fn new(width: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; width],
            m2: vec![0.0; width],
        }
    }

    /// Absorb `x`, then return it standardized against the updated statistics.
    fn update_and_scale(&mut self, x: &[f64]) -> Vec<f64> {
        self.count += 1;
        let n = self.count as f64;
        for (i, &v) in x.iter().enumerate() {
            let delta = v - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (v - self.mean[i]);
        }

        x.iter()
            .enumerate()
            .map(|(i, &v)| {
                if self.count < 2 {
                    return 0.0;
                }
                let std = (self.m2[i] / (n - 1.0)).sqrt();
                if std > 0.0 {
                    (v - self.mean[i]) / std
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Per-run classifier adapter.
#[derive(Debug)]
pub struct RegimeClassifier {
    model: Box<dyn RegimeModel>,
    scaler: Option<FeatureScaler>,
}

impl RegimeClassifier {
    pub fn new(model: Box<dyn RegimeModel>) -> Self {
        Self {
            model,
            scaler: None,
        }
    }

    /// Standardize features online before prediction. The statistics belong
    /// to this instance only.
    pub fn adaptive(mut self) -> Self {
        self.scaler = Some(FeatureScaler::new(self.model.expected_features()));
        self
    }

    pub fn from_spec(spec: &ClassifierSpec) -> Self {
        match spec {
            ClassifierSpec::Rules(thresholds) => {
                Self::new(Box::new(RuleModel::new(thresholds.clone())))
            }
            ClassifierSpec::Linear(model) => {
                let classifier = Self::new(Box::new(LinearRegimeModel::new(model.clone())));
                if model.adaptive {
                    classifier.adaptive()
                } else {
                    classifier
                }
            }
        }
    }

    pub fn expected_features(&self) -> usize {
        self.model.expected_features()
    }

    pub fn classify(&mut self, features: &FeatureVector) -> Result<Regime> {
        let expected = self.model.expected_features();
        if features.len() != expected {
            return Err(BacktestError::FeatureVectorMismatch {
                expected,
                actual: features.len(),
            });
        }

        let regime = match self.scaler.as_mut() {
            Some(scaler) => {
                let scaled = scaler.update_and_scale(features.as_slice());
                self.model.predict(&scaled)
            }
            None => self.model.predict(features.as_slice()),
        };
        Ok(regime)
    }
}
