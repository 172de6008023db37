use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Timeframe;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Insufficient warmup: need {required} bars, have {available}")]
    InsufficientWarmup { required: usize, available: usize },

    #[error("Feature vector mismatch: model expects {expected} features, got {actual}")]
    FeatureVectorMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid transition for order {order_id} ({symbol}): {event} not allowed from {from}")]
    InvalidTransition {
        order_id: u64,
        symbol: String,
        from: String,
        event: String,
    },

    #[error("Out-of-order bar at {timestamp}: last accepted bar was {last}")]
    OutOfOrderBar {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Duplicate bar timestamp {timestamp}")]
    DuplicateTimestamp { timestamp: DateTime<Utc> },

    #[error("Bar at {timestamp} is not on a {timeframe} boundary")]
    MisalignedBar {
        timestamp: DateTime<Utc>,
        timeframe: Timeframe,
    },

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parse error: {0}")]
    CsvError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl BacktestError {
    /// Rejected input that the replay skips with a warning.
    pub fn is_skippable_bar(&self) -> bool {
        matches!(
            self,
            BacktestError::OutOfOrderBar { .. }
                | BacktestError::DuplicateTimestamp { .. }
                | BacktestError::MisalignedBar { .. }
        )
    }

    /// Short machine-readable kind, used when a batch entry records a failure.
    pub fn kind(&self) -> &'static str {
        match self {
            BacktestError::InsufficientWarmup { .. } => "insufficient_warmup",
            BacktestError::FeatureVectorMismatch { .. } => "feature_vector_mismatch",
            BacktestError::InvalidConfiguration(_) => "invalid_configuration",
            BacktestError::InvalidTransition { .. } => "invalid_transition",
            BacktestError::OutOfOrderBar { .. } => "out_of_order_bar",
            BacktestError::DuplicateTimestamp { .. } => "duplicate_timestamp",
            BacktestError::MisalignedBar { .. } => "misaligned_bar",
            BacktestError::DataLoadError(_) => "data_load",
            BacktestError::IoError(_) => "io",
            BacktestError::CsvError(_) => "csv",
            BacktestError::JsonError(_) => "json",
            BacktestError::TomlError(_) => "toml",
            BacktestError::WorkerPool(_) => "worker_pool",
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
