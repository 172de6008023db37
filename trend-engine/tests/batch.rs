mod support;

use std::time::Duration;

use common::{ClassifierSpec, LinearModel, RunStatus};
use trend_engine::{rank, BacktestEngine, CancellationToken, Orchestrator, RunOutcome};

use support::{random_series, scripted_params, scripted_series, sweep_sets};

#[test]
fn test_run_is_deterministic() {
    let series = random_series(1_500, 11);
    let params = sweep_sets().remove(1);

    let a = Orchestrator::new(1).run(params.clone(), &series).unwrap();
    let b = Orchestrator::new(1).run(params, &series).unwrap();

    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_batch_preserves_input_order() {
    let series = random_series(1_500, 3);
    let sets = sweep_sets();

    let entries = Orchestrator::new(4).run_batch(&sets, &series).unwrap();
    assert_eq!(entries.len(), sets.len());

    for (i, (entry, params)) in entries.iter().zip(sets.iter()).enumerate() {
        assert_eq!(entry.index, i);
        assert_eq!(entry.name, params.name);
        let expected = BacktestEngine::new(params.clone())
            .unwrap()
            .run(&series)
            .unwrap();
        assert_eq!(entry.result(), Some(&expected));
    }
}

#[test]
fn test_batch_is_independent_of_worker_count() {
    let series = random_series(800, 5);
    let sets = sweep_sets();

    let serial = Orchestrator::new(1).run_batch(&sets, &series).unwrap();
    let parallel = Orchestrator::new(3).run_batch(&sets, &series).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn test_failed_entry_does_not_abort_siblings() {
    let series = scripted_series();
    // Rows of four weights cannot score six features
    let mismatched = scripted_params()
        .named("mismatched")
        .with_classifier(ClassifierSpec::Linear(LinearModel {
            weights: vec![vec![1.0; 4]; 3],
            bias: vec![0.0; 3],
            min_margin: 0.0,
            adaptive: false,
        }));
    let sets = vec![scripted_params(), mismatched, scripted_params().named("again")];

    let entries = Orchestrator::new(2).run_batch(&sets, &series).unwrap();

    assert_eq!(entries.len(), 3);
    assert!(entries[0].result().is_some());
    assert!(entries[2].result().is_some());
    assert_eq!(
        entries[0].result().unwrap().trades,
        entries[2].result().unwrap().trades
    );
    match &entries[1].outcome {
        RunOutcome::Failed { kind, message } => {
            assert_eq!(kind, "feature_vector_mismatch");
            assert!(message.contains("expects 4"));
        }
        other => panic!("expected a failed entry, got {other:?}"),
    }
    assert_eq!(rank(&entries).len(), 2);
}

#[test]
fn test_cancelled_batch_tags_every_run() {
    let series = random_series(500, 9);
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(2).with_cancel(cancel.clone());
    cancel.cancel();

    let entries = orchestrator.run_batch(&sweep_sets(), &series).unwrap();
    for entry in &entries {
        let result = entry.result().unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.diagnostics.bars_processed < series.len() as u64);
    }
}

#[test]
fn test_expired_timeout_tags_run() {
    let series = random_series(500, 9);
    let result = Orchestrator::new(1)
        .with_timeout(Duration::ZERO)
        .run(sweep_sets().remove(0), &series)
        .unwrap();

    assert_eq!(result.status, RunStatus::TimedOut);
    assert_eq!(result.diagnostics.bars_processed, 0);
    assert!(result.trades.is_empty());
    assert_eq!(result.final_equity, result.initial_capital);
}

#[test]
fn test_generous_timeout_completes() {
    let series = scripted_series();
    let result = Orchestrator::new(1)
        .with_timeout(Duration::from_secs(60))
        .run(scripted_params(), &series)
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.diagnostics.bars_processed, 50);
}
