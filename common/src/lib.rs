pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClassifierSpec, ExecutionParams, LeverageTier, LinearModel, ParameterSet, RiskLimits,
    RuleThresholds, StrategyParams, TimeframeParams,
};
pub use error::{BacktestError, Result};
pub use types::*;
