pub mod aggregate;
pub mod loader;
pub mod synthetic;
pub mod window;

pub use aggregate::BarAggregator;
pub use loader::{load_csv, load_json};
pub use synthetic::{generate_random_walk, generate_trend_legs, TrendLeg};
pub use window::BarWindow;

use std::path::Path;
use std::sync::Arc;

use common::{BacktestError, Bar, Result, Timeframe};

/// Read-only bar series shared by every run of a batch.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Arc<[Bar]>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars: bars.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Load bars from file, detecting format from extension
pub fn load_file(path: &Path) -> Result<Vec<Bar>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        _ => Err(BacktestError::DataLoadError(format!(
            "Unsupported file format: {}",
            ext
        ))),
    }
}
