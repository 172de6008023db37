use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};
use crate::types::Timeframe;

/// Strategy windows and signal thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StrategyParams {
    pub fast_window: usize,
    pub slow_window: usize,
    /// Rolling true-range window of the trend band.
    pub band_period: usize,
    pub band_multiplier: f64,
    pub rsi_period: usize,
    /// Window of close-to-close returns used for volatility.
    pub volatility_window: usize,
    /// Relative MA spread below which fast and slow count as tied.
    pub crossover_epsilon: f64,
    /// Entries weaker than this are emitted as holds.
    pub min_strength: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            fast_window: 9,
            slow_window: 21,
            band_period: 10,
            band_multiplier: 3.0,
            rsi_period: 14,
            volatility_window: 20,
            crossover_epsilon: 1e-9,
            min_strength: 0.6,
        }
    }
}

/// Equity threshold at and above which `leverage` applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeverageTier {
    pub equity_threshold: f64,
    pub leverage: f64,
}

impl LeverageTier {
    pub fn new(equity_threshold: f64, leverage: f64) -> Self {
        Self {
            equity_threshold,
            leverage,
        }
    }
}

/// Risk limits, immutable for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskLimits {
    pub max_position_fraction: f64,
    pub stop_loss_pct: f64,
    pub daily_loss_limit_pct: f64,
    /// Ordered by `equity_threshold`, ascending.
    pub leverage_tiers: Vec<LeverageTier>,
    /// Fraction of equity put at risk between entry and stop.
    pub risk_per_trade: f64,
    /// Smallest tradable order notional, in quote currency.
    pub min_order_notional: f64,
    /// Retracement from the post-entry peak that closes the trailing tranche.
    pub trailing_stop_pct: f64,
    /// Losing trades in a row that halt entries until the next day. 0 disables.
    pub max_consecutive_losses: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_fraction: 0.3,
            stop_loss_pct: 0.02,
            daily_loss_limit_pct: 0.05,
            leverage_tiers: vec![
                LeverageTier::new(0.0, 20.0),
                LeverageTier::new(10_000.0, 10.0),
                LeverageTier::new(100_000.0, 5.0),
            ],
            risk_per_trade: 0.02,
            min_order_notional: 10.0,
            trailing_stop_pct: 0.03,
            max_consecutive_losses: 3,
        }
    }
}

/// Base timeframe of the input series and the candidates the selector may pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeframeParams {
    pub base: Timeframe,
    /// Ascending, each a multiple of `base`.
    pub candidates: Vec<Timeframe>,
    /// Consecutive agreeing bars required before switching.
    pub hysteresis_bars: usize,
    /// Closed trades considered for recent signal quality.
    pub quality_window: usize,
}

impl Default for TimeframeParams {
    fn default() -> Self {
        Self {
            base: Timeframe::H1,
            candidates: vec![Timeframe::H1],
            hysteresis_bars: 3,
            quality_window: 10,
        }
    }
}

/// Thresholds of the rule-based regime model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuleThresholds {
    /// Return volatility at or above which the market is volatile.
    pub volatile_volatility: f64,
    /// Return volatility below which a weak trend counts as ranging.
    pub ranging_volatility: f64,
    /// MA spread (relative to slow MA) that marks a trend.
    pub trend_strength: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            volatile_volatility: 0.05,
            ranging_volatility: 0.02,
            trend_strength: 0.01,
        }
    }
}

/// Fixed linear model: one weight row and bias per regime
/// (trending, ranging, volatile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearModel {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    /// Best score must beat the runner-up by this much, else `unknown`.
    #[serde(default)]
    pub min_margin: f64,
    /// Standardize features online; the statistics live in the run.
    #[serde(default)]
    pub adaptive: bool,
}

/// Regime classifier model reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierSpec {
    Rules(RuleThresholds),
    Linear(LinearModel),
}

impl Default for ClassifierSpec {
    fn default() -> Self {
        ClassifierSpec::Rules(RuleThresholds::default())
    }
}

/// Fill simulation and account settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutionParams {
    pub initial_capital: f64,
    /// Fee per side, as a fraction of notional.
    pub fee_rate: f64,
    /// Adverse slippage applied to market fills, as a fraction of price.
    pub slippage_pct: f64,
    /// Largest fraction of a bar's volume one order may take.
    pub volume_participation: f64,
    /// Bars an entry order may stay open before the remainder is cancelled.
    pub max_fill_bars: usize,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            fee_rate: 0.0005,
            slippage_pct: 0.0005,
            volume_participation: 0.1,
            max_fill_bars: 3,
        }
    }
}

/// Complete configuration of one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ParameterSet {
    pub name: String,
    pub strategy: StrategyParams,
    pub risk: RiskLimits,
    pub timeframes: TimeframeParams,
    pub classifier: ClassifierSpec,
    pub execution: ExecutionParams,
}

impl ParameterSet {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_windows(mut self, fast: usize, slow: usize) -> Self {
        self.strategy.fast_window = fast;
        self.strategy.slow_window = slow;
        self
    }

    pub fn with_band(mut self, period: usize, multiplier: f64) -> Self {
        self.strategy.band_period = period;
        self.strategy.band_multiplier = multiplier;
        self
    }

    pub fn with_min_strength(mut self, min_strength: f64) -> Self {
        self.strategy.min_strength = min_strength;
        self
    }

    pub fn with_risk(mut self, risk: RiskLimits) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_timeframes(mut self, base: Timeframe, candidates: Vec<Timeframe>) -> Self {
        self.timeframes.base = base;
        self.timeframes.candidates = candidates;
        self
    }

    pub fn with_hysteresis(mut self, bars: usize) -> Self {
        self.timeframes.hysteresis_bars = bars;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierSpec) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.execution.initial_capital = capital;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionParams) -> Self {
        self.execution = execution;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let params: ParameterSet = toml::from_str(s)
            .map_err(|e| BacktestError::InvalidConfiguration(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Parse a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let params: ParameterSet = serde_json::from_str(s)
            .map_err(|e| BacktestError::InvalidConfiguration(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "toml" => Self::from_toml_str(&text),
            "json" => Self::from_json_str(&text),
            _ => Err(BacktestError::InvalidConfiguration(format!(
                "Unsupported config format: {}",
                ext
            ))),
        }
    }

    /// Check every field; runs before any bar is processed.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        ensure(s.fast_window >= 1, "strategy.fast_window must be >= 1")?;
        ensure(
            s.fast_window < s.slow_window,
            "strategy.fast_window must be smaller than strategy.slow_window",
        )?;
        ensure(s.band_period >= 1, "strategy.band_period must be >= 1")?;
        ensure(
            s.band_multiplier.is_finite() && s.band_multiplier > 0.0,
            "strategy.band_multiplier must be positive",
        )?;
        ensure(s.rsi_period >= 1, "strategy.rsi_period must be >= 1")?;
        ensure(
            s.volatility_window >= 2,
            "strategy.volatility_window must be >= 2",
        )?;
        ensure(
            s.crossover_epsilon.is_finite() && s.crossover_epsilon >= 0.0,
            "strategy.crossover_epsilon must be non-negative",
        )?;
        ensure(
            (0.0..=1.0).contains(&s.min_strength),
            "strategy.min_strength must be within [0, 1]",
        )?;

        let r = &self.risk;
        ensure(
            fraction(r.max_position_fraction),
            "risk.max_position_fraction must be within (0, 1]",
        )?;
        ensure(
            fraction(r.stop_loss_pct) && r.stop_loss_pct < 1.0,
            "risk.stop_loss_pct must be within (0, 1)",
        )?;
        ensure(
            fraction(r.daily_loss_limit_pct),
            "risk.daily_loss_limit_pct must be within (0, 1]",
        )?;
        ensure(
            fraction(r.risk_per_trade),
            "risk.risk_per_trade must be within (0, 1]",
        )?;
        ensure(
            r.min_order_notional.is_finite() && r.min_order_notional >= 0.0,
            "risk.min_order_notional must be non-negative",
        )?;
        ensure(
            fraction(r.trailing_stop_pct) && r.trailing_stop_pct < 1.0,
            "risk.trailing_stop_pct must be within (0, 1)",
        )?;
        ensure(
            !r.leverage_tiers.is_empty(),
            "risk.leverage_tiers must not be empty",
        )?;
        for tier in &r.leverage_tiers {
            ensure(
                tier.equity_threshold.is_finite() && tier.equity_threshold >= 0.0,
                "risk.leverage_tiers thresholds must be non-negative",
            )?;
            ensure(
                tier.leverage.is_finite() && tier.leverage >= 1.0,
                "risk.leverage_tiers leverage must be >= 1",
            )?;
        }
        ensure(
            r.leverage_tiers
                .windows(2)
                .all(|w| w[0].equity_threshold <= w[1].equity_threshold),
            "risk.leverage_tiers must be ordered by equity_threshold",
        )?;

        let t = &self.timeframes;
        ensure(
            !t.candidates.is_empty(),
            "timeframes.candidates must not be empty",
        )?;
        ensure(
            t.candidates.windows(2).all(|w| w[0] < w[1]),
            "timeframes.candidates must be strictly ascending",
        )?;
        for tf in &t.candidates {
            ensure(
                tf.minutes() % t.base.minutes() == 0,
                &format!("timeframe {} is not a multiple of base {}", tf, t.base),
            )?;
        }
        ensure(
            t.hysteresis_bars >= 1,
            "timeframes.hysteresis_bars must be >= 1",
        )?;
        ensure(
            t.quality_window >= 1,
            "timeframes.quality_window must be >= 1",
        )?;

        match &self.classifier {
            ClassifierSpec::Rules(rules) => {
                ensure(
                    rules.ranging_volatility <= rules.volatile_volatility,
                    "classifier.rules.ranging_volatility must not exceed volatile_volatility",
                )?;
                ensure(
                    rules.trend_strength >= 0.0,
                    "classifier.rules.trend_strength must be non-negative",
                )?;
            }
            ClassifierSpec::Linear(model) => {
                ensure(
                    model.weights.len() == 3 && model.bias.len() == 3,
                    "classifier.linear needs 3 weight rows and 3 biases",
                )?;
                ensure(
                    model.weights.iter().all(|row| row.len() == model.weights[0].len()),
                    "classifier.linear weight rows must have equal length",
                )?;
                ensure(
                    model.min_margin >= 0.0,
                    "classifier.linear.min_margin must be non-negative",
                )?;
            }
        }

        let e = &self.execution;
        ensure(
            e.initial_capital.is_finite() && e.initial_capital > 0.0,
            "execution.initial_capital must be positive",
        )?;
        ensure(
            e.fee_rate.is_finite() && (0.0..1.0).contains(&e.fee_rate),
            "execution.fee_rate must be within [0, 1)",
        )?;
        ensure(
            e.slippage_pct.is_finite() && (0.0..1.0).contains(&e.slippage_pct),
            "execution.slippage_pct must be within [0, 1)",
        )?;
        ensure(
            fraction(e.volume_participation),
            "execution.volume_participation must be within (0, 1]",
        )?;
        ensure(
            e.max_fill_bars >= 1,
            "execution.max_fill_bars must be >= 1",
        )?;

        Ok(())
    }
}

fn fraction(v: f64) -> bool {
    v.is_finite() && v > 0.0 && v <= 1.0
}

fn ensure(cond: bool, msg: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(BacktestError::InvalidConfiguration(msg.to_string()))
    }
}
