//! Batch execution of independent backtests over a bounded worker pool.

use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use common::{BacktestError, BacktestResult, ParameterSet, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::BarSeries;
use crate::engine::{BacktestEngine, CancellationToken, RunControl};

/// Outcome of one batch entry. A failed run never aborts its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(BacktestResult),
    Failed { kind: String, message: String },
}

/// One entry of a batch, at the position of its parameter set in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: usize,
    pub name: String,
    pub outcome: RunOutcome,
}

impl BatchEntry {
    pub fn result(&self) -> Option<&BacktestResult> {
        match &self.outcome {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed { .. })
    }
}

/// Runs parameter sets against a shared bar series.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    workers: usize,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(rayon::current_num_threads())
    }
}

impl Orchestrator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Per-run wall-clock budget; an expired run is tagged `timed_out`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Token that cancels every run started by this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn control(&self) -> RunControl {
        RunControl {
            cancel: self.cancel.clone(),
            timeout: self.timeout,
        }
    }

    /// Run a single parameter set.
    pub fn run(&self, params: ParameterSet, series: &BarSeries) -> Result<BacktestResult> {
        BacktestEngine::new(params)?.run_with(series, &self.control())
    }

    /// Run every parameter set on the pool. Entries come back in input order.
    pub fn run_batch(&self, sets: &[ParameterSet], series: &BarSeries) -> Result<Vec<BatchEntry>> {
        if self.workers == 0 {
            return Err(BacktestError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| BacktestError::WorkerPool(e.to_string()))?;

        let started = Instant::now();
        info!(runs = sets.len(), workers = self.workers, "Batch started");

        let control = self.control();
        let mut entries: Vec<BatchEntry> = pool.install(|| {
            sets.par_iter()
                .enumerate()
                .map(|(index, params)| run_entry(index, params, series, &control))
                .collect()
        });
        // collect() keeps order already; sort anyway so the guarantee does not
        // depend on the collection strategy
        entries.sort_by_key(|e| e.index);

        let failed = entries.iter().filter(|e| e.is_failed()).count();
        info!(
            runs = entries.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        Ok(entries)
    }
}

fn run_entry(
    index: usize,
    params: &ParameterSet,
    series: &BarSeries,
    control: &RunControl,
) -> BatchEntry {
    let name = params.name.clone();
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        BacktestEngine::new(params.clone())?.run_with(series, control)
    }));

    let outcome = match run {
        Ok(Ok(result)) => RunOutcome::Completed(result),
        Ok(Err(e)) => {
            warn!(index, name = %name, error = %e, "Run failed");
            RunOutcome::Failed {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "run panicked".to_string());
            warn!(index, name = %name, %message, "Run panicked");
            RunOutcome::Failed {
                kind: "panic".to_string(),
                message,
            }
        }
    };

    BatchEntry {
        index,
        name,
        outcome,
    }
}

/// Completed entries, best first: Sharpe-like ratio, then total return, both
/// descending, then input index. NaN ranks last.
pub fn rank(entries: &[BatchEntry]) -> Vec<&BatchEntry> {
    let mut ranked: Vec<&BatchEntry> = entries.iter().filter(|e| e.result().is_some()).collect();
    ranked.sort_by(|a, b| compare_entries(a, b));
    ranked
}

fn compare_entries(a: &BatchEntry, b: &BatchEntry) -> Ordering {
    let key = |e: &BatchEntry| {
        e.result()
            .map(|r| {
                (
                    finite_or_worst(r.summary_stats.sharpe_ratio),
                    finite_or_worst(r.summary_stats.total_return),
                )
            })
            .unwrap_or((f64::NEG_INFINITY, f64::NEG_INFINITY))
    };
    let (sa, ra) = key(a);
    let (sb, rb) = key(b);
    sb.total_cmp(&sa)
        .then_with(|| rb.total_cmp(&ra))
        .then_with(|| a.index.cmp(&b.index))
}

fn finite_or_worst(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}
