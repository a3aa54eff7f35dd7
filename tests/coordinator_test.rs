//! End-to-end coordinator tests with a scripted trial engine
//!
//! The engine replays a fixed list of steps on tokio's paused clock, so time
//! budgets, cancellation and grace periods are exercised deterministically.

use arrow::array::{Float64Array, Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trueno_automl::config::{Budget, ExperimentConfig};
use trueno_automl::dataset::TableDataset;
use trueno_automl::engine::{TrialEngine, TrialRequest, TrialStream};
use trueno_automl::experiment::{
    CancellationSignal, CancellationSource, ExperimentCoordinator, ExperimentOutcome,
    ExperimentRequest, ExperimentState, ExperimentSummaryEvent, ProgressObserver, StopCause,
    TerminationReason, TrialFailure, TrialProgress, TrialRun,
};
use trueno_automl::metric::{MetricDirection, OptimizingMetric, TaskKind};
use trueno_automl::split::{RowSplitter, SplitStrategy};
use trueno_automl::Error;

// ============================================================================
// Scripted engine
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success(f64),
    /// Claims `score` while reporting `reported` for the metric
    Misreported { reported: f64, score: f64 },
    /// Claims `score` without reporting the metric at all
    Unreported(f64),
    Failure,
    Fatal,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    after: Duration,
    outcome: Outcome,
}

fn success(seconds: u64, score: f64) -> Step {
    Step {
        after: Duration::from_secs(seconds),
        outcome: Outcome::Success(score),
    }
}

fn failure(seconds: u64) -> Step {
    Step {
        after: Duration::from_secs(seconds),
        outcome: Outcome::Failure,
    }
}

fn fatal(seconds: u64) -> Step {
    Step {
        after: Duration::from_secs(seconds),
        outcome: Outcome::Fatal,
    }
}

fn misreported(seconds: u64, reported: f64, score: f64) -> Step {
    Step {
        after: Duration::from_secs(seconds),
        outcome: Outcome::Misreported { reported, score },
    }
}

fn unreported(seconds: u64, score: f64) -> Step {
    Step {
        after: Duration::from_secs(seconds),
        outcome: Outcome::Unreported(score),
    }
}

impl Step {
    fn into_trial(self, position: usize, metric: &str) -> TrialRun<String> {
        let runtime = self.after.as_secs_f64();
        let pipeline = format!("pipeline-{position}");
        let model = format!("model-{position}");
        match self.outcome {
            Outcome::Success(score) => {
                let metrics = BTreeMap::from([(metric.to_string(), score)]);
                TrialRun::success(pipeline, "FastTree", metrics, score, runtime, model)
            }
            Outcome::Misreported { reported, score } => {
                let metrics = BTreeMap::from([(metric.to_string(), reported)]);
                TrialRun::success(pipeline, "Overconfident", metrics, score, runtime, model)
            }
            Outcome::Unreported(score) => {
                TrialRun::success(pipeline, "Silent", BTreeMap::new(), score, runtime, model)
            }
            Outcome::Failure => {
                TrialRun::failed(pipeline, "LightGbm", runtime, TrialFailure::new("diverged"))
            }
            Outcome::Fatal => TrialRun::failed(
                pipeline,
                "LightGbm",
                runtime,
                TrialFailure::fatal("native library failed to load"),
            ),
        }
    }
}

/// Replays steps, each finishing `after` the previous one.
struct ScriptedEngine {
    steps: Vec<Step>,
    honour_stop: bool,
    linger: bool,
}

impl ScriptedEngine {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            honour_stop: true,
            linger: false,
        }
    }

    /// Closes the stream after the last step but never exits.
    fn lingering(steps: Vec<Step>) -> Self {
        Self {
            steps,
            honour_stop: true,
            linger: true,
        }
    }

    fn stubborn(steps: Vec<Step>) -> Self {
        Self {
            steps,
            honour_stop: false,
            linger: false,
        }
    }
}

impl<D: Send + Sync + 'static> TrialEngine<D> for ScriptedEngine {
    type Artifact = String;

    fn start(&self, request: TrialRequest<D>) -> TrialStream<String> {
        let steps = self.steps.clone();
        let honour_stop = self.honour_stop;
        let linger = self.linger;
        let metric = request.metric.name().to_string();
        let mut stop = request.stop;
        TrialStream::spawn(request.channel_capacity, move |sender| async move {
            for (position, step) in steps.into_iter().enumerate() {
                if honour_stop {
                    tokio::select! {
                        biased;
                        () = stop.cancelled() => return Ok(()),
                        () = tokio::time::sleep(step.after) => {}
                    }
                } else {
                    tokio::time::sleep(step.after).await;
                }
                if sender.send(step.into_trial(position, &metric)).await.is_err() {
                    break;
                }
            }
            if linger {
                drop(sender);
                std::future::pending::<()>().await;
            }
            Ok::<(), Error>(())
        })
    }
}

/// Engine whose task fails outright.
struct BrokenEngine;

impl<D: Send + Sync + 'static> TrialEngine<D> for BrokenEngine {
    type Artifact = String;

    fn start(&self, request: TrialRequest<D>) -> TrialStream<String> {
        TrialStream::spawn(request.channel_capacity, |_sender| async move {
            Err::<(), Error>(Error::EngineFatal("GPU context lost".to_string()))
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_precision_loss)]
fn dataset(rows: usize) -> Arc<TableDataset> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("label", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from_iter_values((0..rows).map(|i| i as i32))),
            Arc::new(Float64Array::from_iter_values((0..rows).map(|i| (i % 2) as f64))),
        ],
    )
    .unwrap();
    Arc::new(TableDataset::from_batches(vec![batch]).unwrap())
}

fn request(rows: usize, budget: Budget) -> ExperimentRequest<TableDataset> {
    ExperimentRequest::new(
        dataset(rows),
        "label",
        OptimizingMetric::new("Accuracy", MetricDirection::Maximize),
        budget,
    )
    .with_task(TaskKind::BinaryClassification)
    .with_dataset_name("synthetic")
}

fn coordinator(engine: ScriptedEngine) -> ExperimentCoordinator<TableDataset, ScriptedEngine, RowSplitter> {
    ExperimentCoordinator::new(engine, RowSplitter::default(), ExperimentConfig::default()).unwrap()
}

fn scores(trials: &[TrialRun<String>]) -> Vec<f64> {
    trials.iter().filter_map(TrialRun::score).collect()
}

#[derive(Default)]
struct Recorded {
    started: usize,
    trials: Vec<TrialProgress>,
    finished: Vec<ExperimentSummaryEvent>,
}

#[derive(Clone, Default)]
struct RecordingObserver(Arc<Mutex<Recorded>>);

impl ProgressObserver for RecordingObserver {
    fn on_experiment_start(&mut self, _plan: &trueno_automl::split::SplitPlan) {
        self.0.lock().unwrap().started += 1;
    }

    fn on_trial(&mut self, progress: &TrialProgress) {
        self.0.lock().unwrap().trials.push(progress.clone());
    }

    fn on_experiment_end(&mut self, summary: &ExperimentSummaryEvent) {
        self.0.lock().unwrap().finished.push(summary.clone());
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scenario_small_dataset_runs_to_completion() {
    let mut steps: Vec<Step> = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95]
        .into_iter()
        .map(|score| success(1, score))
        .collect();
    steps.insert(3, failure(1));
    steps.insert(8, failure(1));

    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let report = coordinator
        .run(request(500, Budget::time(3600)), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(
        report.split_plan().strategy(),
        SplitStrategy::CrossValidation { folds: 10 }
    );
    assert_eq!(report.trial_count(), 12);
    assert_eq!(report.failed_trial_count(), 2);
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.95));
    assert_eq!(scores(report.top_trials()), vec![0.95, 0.9, 0.8, 0.7, 0.6]);
    assert_eq!(report.termination_reason(), TerminationReason::Completed);
    assert_eq!(report.stop_cause(), StopCause::EngineExhausted);
    assert_eq!(report.outcome(), ExperimentOutcome::Completed);
    assert_eq!(coordinator.state(), ExperimentState::Completed);
}

#[tokio::test(start_paused = true)]
async fn scenario_large_dataset_uses_holdout() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(1, 0.7)]));
    let report = coordinator
        .run(request(20_000, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.split_plan().strategy(), SplitStrategy::HoldOut);
    assert_eq!(report.split_plan().fold_count(), None);
}

#[tokio::test(start_paused = true)]
async fn scenario_timeout_before_any_trial_is_an_error() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(10, 0.9)]));
    let err = coordinator
        .run(request(500, Budget::time(5)), CancellationSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::NoTrialsBeforeTimeout {
            failed_trials: 0,
            ..
        }
    ));
    assert!(!err.is_fatal());
    assert_eq!(coordinator.state(), ExperimentState::Failed);
}

#[tokio::test(start_paused = true)]
async fn scenario_timeout_with_only_failures_is_an_error() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![failure(1), failure(1), success(60, 0.9)]));
    let err = coordinator
        .run(request(500, Budget::time(5)), CancellationSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::NoTrialsBeforeTimeout {
            failed_trials: 2,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn scenario_timeout_with_only_nan_scores_is_an_error() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(1, f64::NAN), success(100, 0.5)]));
    let err = coordinator
        .run(request(500, Budget::time(5)), CancellationSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::NoTrialsBeforeTimeout {
            failed_trials: 1,
            ..
        }
    ));
    assert_eq!(coordinator.state(), ExperimentState::Failed);
}

#[tokio::test(start_paused = true)]
async fn scenario_timeout_after_trials_completes_with_best() {
    let steps = vec![success(1, 0.6), success(1, 0.8), success(1, 0.7), success(100, 0.99)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let report = coordinator
        .run(request(500, Budget::time(10)), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.termination_reason(), TerminationReason::Completed);
    assert_eq!(report.stop_cause(), StopCause::TimeBudgetElapsed);
    assert_eq!(report.outcome(), ExperimentOutcome::StoppedEarlyWithModel);
    assert_eq!(report.trial_count(), 3);
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.8));
    assert_eq!(report.best_trial().and_then(TrialRun::artifact).map(String::as_str), Some("model-1"));
}

#[tokio::test(start_paused = true)]
async fn scenario_user_cancel_keeps_partial_results() {
    let steps = vec![success(1, 0.5), success(1, 0.75), success(10, 0.99)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));

    let source = CancellationSource::new();
    let signal = source.signal();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        source.cancel();
    });

    let report = coordinator
        .run(request(500, Budget::time(3600)), signal)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(report.termination_reason(), TerminationReason::UserCancelled);
    assert_eq!(report.stop_cause(), StopCause::UserCancelled);
    assert_eq!(report.outcome(), ExperimentOutcome::CancelledWithPartialResults);
    assert_eq!(report.trial_count(), 2);
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.75));
    assert_eq!(coordinator.state(), ExperimentState::UserCancelled);
}

// ============================================================================
// Budgets, failures and validation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_reports_nothing() {
    let source = CancellationSource::new();
    source.cancel();
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(1, 0.5)]));

    let report = coordinator
        .run(request(500, Budget::unbounded()), source.signal())
        .await
        .unwrap();

    assert_eq!(report.termination_reason(), TerminationReason::UserCancelled);
    assert_eq!(report.trial_count(), 0);
    assert!(report.best_trial().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_trial_budget_caps_trial_count() {
    let steps = (0..6).map(|i| success(1, f64::from(i) / 10.0)).collect();
    let mut coordinator = coordinator(ScriptedEngine::stubborn(steps));

    let report = coordinator
        .run(request(500, Budget::trials(3)), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.trial_count(), 3);
    assert_eq!(report.stop_cause(), StopCause::TrialBudgetReached);
    assert_eq!(report.termination_reason(), TerminationReason::Completed);
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.2));
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_captures_then_abandons_stubborn_engine() {
    let steps = (0..20).map(|_| success(1, 0.5)).collect();
    let mut coordinator = coordinator(ScriptedEngine::stubborn(steps));

    let source = CancellationSource::new();
    let signal = source.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        source.cancel();
    });

    let report = coordinator
        .run(request(500, Budget::unbounded()), signal)
        .await
        .unwrap();

    // Two trials before the cancel, two more inside the 2 s grace period.
    assert_eq!(report.trial_count(), 4);
    assert_eq!(report.termination_reason(), TerminationReason::UserCancelled);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trials_do_not_abort() {
    let steps = vec![failure(1), success(1, 0.4), failure(1)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));

    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.trial_count(), 3);
    assert_eq!(report.failed_trial_count(), 2);
    assert_eq!(report.top_trials().len(), 1);
    assert_eq!(report.all_trials()[1].index(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_exhausted_without_success_completes_empty() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![failure(1)]));
    let report = coordinator
        .run(request(500, Budget::time(60)), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.termination_reason(), TerminationReason::Completed);
    assert!(report.best_trial().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_trial_aborts_experiment() {
    let steps = vec![success(1, 0.5), fatal(1), success(1, 0.9)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));

    let err = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EngineFatal(ref m) if m.contains("native library")));
    assert!(err.is_fatal());
    assert_eq!(coordinator.state(), ExperimentState::Failed);
}

#[tokio::test]
async fn test_engine_error_fails_experiment() {
    let mut coordinator =
        ExperimentCoordinator::new(BrokenEngine, RowSplitter::default(), ExperimentConfig::default())
            .unwrap();

    let err = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EngineFatal(ref m) if m.contains("GPU context lost")));
    assert_eq!(coordinator.state(), ExperimentState::Failed);
}

#[tokio::test]
async fn test_missing_label_column_rejected() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![]));
    let mut request = request(500, Budget::unbounded());
    request.label_column = "price".to_string();

    let err = coordinator.run(request, CancellationSignal::never()).await.unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(message.contains("'price'"));
    assert!(message.contains("id, label"));
    assert_eq!(coordinator.state(), ExperimentState::Failed);
}

#[tokio::test]
async fn test_empty_dataset_rejected() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![]));
    let err = coordinator
        .run(request(0, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("empty")));
}

#[tokio::test]
async fn test_zero_budget_rejected() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![]));
    for budget in [Budget::time(0), Budget::trials(0)] {
        let err = coordinator
            .run(request(500, budget), CancellationSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

#[tokio::test]
async fn test_empty_metric_name_rejected() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![]));
    let mut request = request(500, Budget::unbounded());
    request.metric = OptimizingMetric::new("  ", MetricDirection::Maximize);

    let err = coordinator.run(request, CancellationSignal::never()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn test_supplied_validation_forces_holdout() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(1, 0.5)]));
    let request = request(500, Budget::unbounded()).with_validation(dataset(50));

    let report = coordinator.run(request, CancellationSignal::never()).await.unwrap();
    assert_eq!(report.split_plan().strategy(), SplitStrategy::HoldOut);
    assert!(report.split_plan().uses_supplied_validation());
}

#[tokio::test(start_paused = true)]
async fn test_minimizing_metric_picks_lowest() {
    let steps = vec![success(1, 0.4), success(1, 0.1), success(1, 0.3)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let mut request = request(500, Budget::unbounded());
    request.metric = OptimizingMetric::known("RMS-loss").unwrap();

    let report = coordinator.run(request, CancellationSignal::never()).await.unwrap();
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.1));
    assert_eq!(scores(report.top_trials()), vec![0.1, 0.3, 0.4]);
}

#[tokio::test(start_paused = true)]
async fn test_nan_scored_trial_never_best() {
    let steps = vec![success(1, f64::NAN), success(1, 0.2)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.trial_count(), 2);
    assert_eq!(report.best_trial().and_then(TrialRun::score), Some(0.2));
    assert_eq!(scores(report.top_trials()), vec![0.2]);
}

#[tokio::test(start_paused = true)]
async fn test_score_must_match_reported_metric() {
    let steps = vec![success(1, 0.8), misreported(1, 0.1, 0.99), unreported(1, 0.5)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    let best = report.best_trial().unwrap();
    assert_eq!(best.trainer_name(), "FastTree");
    assert_eq!(best.score(), Some(0.8));
    assert_eq!(report.top_trials().len(), 1);
    assert_eq!(report.failed_trial_count(), 2);

    let failures: Vec<&str> = report
        .all_trials()
        .iter()
        .filter_map(|trial| trial.failure().map(TrialFailure::message))
        .collect();
    assert!(failures[0].contains("does not match"));
    assert!(failures[1].contains("'Accuracy'"));
}

#[tokio::test(start_paused = true)]
async fn test_engine_lingering_after_stream_end_is_aborted() {
    let mut coordinator = coordinator(ScriptedEngine::lingering(vec![success(1, 0.6)]));
    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    assert_eq!(report.stop_cause(), StopCause::EngineExhausted);
    assert_eq!(report.trial_count(), 1);
    assert_eq!(coordinator.state(), ExperimentState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_observers_see_every_trial_in_order() {
    let recorder = RecordingObserver::default();
    let steps = vec![success(1, 0.5), failure(1), success(1, 0.4), success(1, 0.9)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps)).with_observer(recorder.clone());

    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    let recorded = recorder.0.lock().unwrap();
    assert_eq!(recorded.started, 1);
    let iterations: Vec<usize> = recorded.trials.iter().map(|p| p.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2, 3]);
    let best_flags: Vec<bool> = recorded.trials.iter().map(|p| p.is_best).collect();
    assert_eq!(best_flags, vec![true, false, false, true]);
    assert_eq!(recorded.trials[1].failure.as_deref(), Some("diverged"));

    assert_eq!(recorded.finished.len(), 1);
    assert_eq!(recorded.finished[0].trial_count, report.trial_count());
    assert_eq!(recorded.finished[0].best_score, Some(0.9));
}

#[tokio::test(start_paused = true)]
async fn test_artifacts_kept_only_for_ranked_trials() {
    let steps = vec![success(1, 0.5), success(1, 0.9)];
    let mut coordinator = coordinator(ScriptedEngine::new(steps));
    let report = coordinator
        .run(request(500, Budget::unbounded()), CancellationSignal::never())
        .await
        .unwrap();

    assert!(report.all_trials().iter().all(|trial| trial.artifact().is_none()));
    assert!(report.top_trials().iter().all(|trial| trial.artifact().is_some()));
    let best = report.into_best_trial().unwrap();
    assert_eq!(best.artifact().map(String::as_str), Some("model-1"));
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_can_run_again() {
    let mut coordinator = coordinator(ScriptedEngine::new(vec![success(1, 0.5)]));
    for _ in 0..2 {
        let report = coordinator
            .run(request(500, Budget::unbounded()), CancellationSignal::never())
            .await
            .unwrap();
        assert_eq!(report.trial_count(), 1);
    }
}

#[test]
fn test_invalid_config_rejected() {
    let config = ExperimentConfig {
        top_n: 0,
        ..ExperimentConfig::default()
    };
    let result: Result<ExperimentCoordinator<TableDataset, _, _>, _> =
        ExperimentCoordinator::new(ScriptedEngine::new(vec![]), RowSplitter::default(), config);
    assert!(result.is_err());
}
