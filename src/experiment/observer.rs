//! Progress observers
//!
//! Observers are handed to the coordinator at construction and called on the
//! coordinator task right after each trial is recorded, never from engine
//! threads. All methods have no-op defaults.
//!
//! # Example
//!
//! ```rust
//! use trueno_automl::experiment::{ProgressObserver, TrialProgress};
//!
//! struct CountBest(usize);
//!
//! impl ProgressObserver for CountBest {
//!     fn on_trial(&mut self, progress: &TrialProgress) {
//!         if progress.is_best {
//!             self.0 += 1;
//!         }
//!     }
//! }
//! ```

use super::report::{StopCause, TerminationReason};
use super::trial::TrialRun;
use crate::split::SplitPlan;
use serde::Serialize;
use std::collections::BTreeMap;

/// Progress event for one recorded trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialProgress {
    /// 0-based completion index
    pub iteration: usize,
    /// Trainer algorithm name
    pub trainer_name: String,
    /// Optimizing metric value (`None` for failed trials)
    pub score: Option<f64>,
    /// Trial duration in seconds
    pub runtime_seconds: f64,
    /// Reported metrics
    pub metrics: BTreeMap<String, f64>,
    /// Whether this trial became the new best
    pub is_best: bool,
    /// Best score after this trial
    pub best_score: Option<f64>,
    /// Failure message, if the trial failed
    pub failure: Option<String>,
}

impl TrialProgress {
    pub(crate) fn from_trial<A>(trial: &TrialRun<A>, is_best: bool, best_score: Option<f64>) -> Self {
        Self {
            iteration: trial.index(),
            trainer_name: trial.trainer_name().to_string(),
            score: trial.score(),
            runtime_seconds: trial.runtime_seconds(),
            metrics: trial.metrics().clone(),
            is_best,
            best_score,
            failure: trial.failure().map(|failure| failure.message().to_string()),
        }
    }
}

/// Event emitted once when an experiment produced a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummaryEvent {
    /// How the run ended
    pub termination_reason: TerminationReason,
    /// Why trial intake stopped
    pub stop_cause: StopCause,
    /// Trials observed
    pub trial_count: usize,
    /// Failed trials observed
    pub failed_trials: usize,
    /// Sum of trial runtimes
    pub elapsed_seconds: f64,
    /// Best score, if any trial succeeded
    pub best_score: Option<f64>,
    /// Trainer of the best trial
    pub best_trainer: Option<String>,
}

/// Receives experiment progress.
pub trait ProgressObserver: Send {
    /// Called after planning, before the first trial is requested.
    fn on_experiment_start(&mut self, _plan: &SplitPlan) {}

    /// Called after each trial is recorded.
    fn on_trial(&mut self, _progress: &TrialProgress) {}

    /// Called once when a report is produced.
    fn on_experiment_end(&mut self, _summary: &ExperimentSummaryEvent) {}

    /// Observer name for logging.
    fn name(&self) -> &'static str {
        "ProgressObserver"
    }
}

/// Observer writing progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_experiment_start(&mut self, plan: &SplitPlan) {
        tracing::info!(
            rows = plan.row_count(),
            strategy = ?plan.strategy(),
            "experiment started"
        );
    }

    fn on_trial(&mut self, progress: &TrialProgress) {
        match &progress.failure {
            Some(failure) => tracing::warn!(
                iteration = progress.iteration,
                trainer = %progress.trainer_name,
                %failure,
                "trial failed"
            ),
            None => tracing::info!(
                iteration = progress.iteration,
                trainer = %progress.trainer_name,
                score = progress.score,
                runtime_seconds = progress.runtime_seconds,
                is_best = progress.is_best,
                "trial completed"
            ),
        }
    }

    fn on_experiment_end(&mut self, summary: &ExperimentSummaryEvent) {
        tracing::info!(
            reason = ?summary.termination_reason,
            cause = ?summary.stop_cause,
            trials = summary.trial_count,
            best_score = summary.best_score,
            "experiment finished"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingObserver"
    }
}
