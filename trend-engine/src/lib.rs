pub mod data;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod orchestrator;
pub mod orders;
pub mod portfolio;
pub mod regime;
pub mod risk;
pub mod signals;
pub mod sweep;
pub mod timeframe;

pub use data::{
    generate_random_walk, generate_trend_legs, load_file, BarAggregator, BarSeries, BarWindow,
    TrendLeg,
};
pub use engine::{BacktestEngine, CancellationToken, RunControl};
pub use execution::{ExecutionReport, ExecutionVenue, FillSimulator, OrderHandle};
pub use indicators::{IndicatorEngine, IndicatorSnapshot, MaRelation};
pub use metrics::PerformanceAggregator;
pub use orchestrator::{rank, BatchEntry, Orchestrator, RunOutcome};
pub use orders::{Order, OrderEvent};
pub use portfolio::{Portfolio, Position};
pub use regime::{FeatureVector, RegimeClassifier, RegimeModel};
pub use risk::{PositionSizer, SizingOutcome};
pub use signals::SignalGenerator;
pub use sweep::ParameterGrid;
pub use timeframe::{SignalQuality, TimeframeSelector};

// Re-export common types
pub use common::{
    BacktestError, BacktestResult, Bar, ParameterSet, Regime, Result, RunStatus, Side, Signal,
    SignalAction, SummaryStats, Timeframe, Trade,
};
