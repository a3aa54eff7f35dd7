//! Experiment report - final output of a coordinator run

use super::trial::TrialRun;
use crate::metric::{OptimizingMetric, TaskKind};
use crate::split::SplitPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How an experiment that produced a report ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The engine finished, a budget ran out with a usable model, or the
    /// trial budget was reached.
    Completed,
    /// The user cancelled; the report holds the partial results.
    UserCancelled,
}

/// Why trial intake stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCause {
    /// The engine ran out of pipelines (or its own internal budget).
    EngineExhausted,
    /// The time budget elapsed.
    TimeBudgetElapsed,
    /// The configured number of trials was reached.
    TrialBudgetReached,
    /// The user cancelled.
    UserCancelled,
}

/// User-facing classification of a finished experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentOutcome {
    /// Ran to completion.
    Completed,
    /// Stopped early by a budget, but a usable model exists.
    StoppedEarlyWithModel,
    /// Cancelled by the user; `best_trial` may still be usable.
    CancelledWithPartialResults,
}

/// Final report of an experiment.
#[derive(Debug)]
pub struct ExperimentReport<A> {
    pub(crate) task: Option<TaskKind>,
    pub(crate) dataset_name: String,
    pub(crate) label_column: String,
    pub(crate) metric: OptimizingMetric,
    pub(crate) split_plan: SplitPlan,
    pub(crate) best_trial: Option<TrialRun<A>>,
    pub(crate) top_trials: Vec<TrialRun<A>>,
    pub(crate) all_trials: Vec<TrialRun<A>>,
    pub(crate) termination_reason: TerminationReason,
    pub(crate) stop_cause: StopCause,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
}

impl<A> ExperimentReport<A> {
    /// Best trial, carrying the winning model; `None` if nothing succeeded.
    #[must_use]
    pub const fn best_trial(&self) -> Option<&TrialRun<A>> {
        self.best_trial.as_ref()
    }

    /// Take ownership of the best trial and its model.
    #[must_use]
    pub fn into_best_trial(self) -> Option<TrialRun<A>> {
        self.best_trial
    }

    /// Best successful trials, best first.
    #[must_use]
    pub fn top_trials(&self) -> &[TrialRun<A>] {
        &self.top_trials
    }

    /// Every trial observed, in completion order.
    #[must_use]
    pub fn all_trials(&self) -> &[TrialRun<A>] {
        &self.all_trials
    }

    /// Number of trials observed.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.all_trials.len()
    }

    /// Number of failed trials.
    #[must_use]
    pub fn failed_trial_count(&self) -> usize {
        self.all_trials.iter().filter(|t| !t.is_success()).count()
    }

    /// Sum of trial runtimes in seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.all_trials.iter().map(TrialRun::runtime_seconds).sum()
    }

    /// Wall-clock duration of the whole run.
    #[must_use]
    pub fn wall_clock(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// How the run ended.
    #[must_use]
    pub const fn termination_reason(&self) -> TerminationReason {
        self.termination_reason
    }

    /// Why trial intake stopped.
    #[must_use]
    pub const fn stop_cause(&self) -> StopCause {
        self.stop_cause
    }

    /// Validation strategy used.
    #[must_use]
    pub const fn split_plan(&self) -> &SplitPlan {
        &self.split_plan
    }

    /// Metric trials were ranked by.
    #[must_use]
    pub const fn metric(&self) -> &OptimizingMetric {
        &self.metric
    }

    /// When planning started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run reached its terminal state.
    #[must_use]
    pub const fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Classify the run for display or telemetry.
    #[must_use]
    pub const fn outcome(&self) -> ExperimentOutcome {
        match (self.termination_reason, self.stop_cause) {
            (TerminationReason::UserCancelled, _) => ExperimentOutcome::CancelledWithPartialResults,
            (_, StopCause::TimeBudgetElapsed) => ExperimentOutcome::StoppedEarlyWithModel,
            _ => ExperimentOutcome::Completed,
        }
    }

    /// Serializable summary of the run (task, data, top algorithms).
    #[must_use]
    pub fn summary(&self) -> TrainSummary {
        TrainSummary {
            task: self.task,
            dataset: self.dataset_name.clone(),
            label: self.label_column.clone(),
            metric: self.metric.name().to_string(),
            experiment_seconds: self.elapsed_seconds(),
            models_explored: self.trial_count(),
            algorithms: self
                .top_trials
                .iter()
                .map(|trial| AlgorithmSummary {
                    iteration: trial.index() + 1,
                    trainer_name: trial.trainer_name().to_string(),
                    score: trial.score().unwrap_or(f64::NAN),
                    runtime_seconds: trial.runtime_seconds(),
                    metrics: trial.metrics().clone(),
                })
                .collect(),
        }
    }
}

/// One row of the "top models" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSummary {
    /// 1-based iteration in which the trial completed
    pub iteration: usize,
    /// Trainer algorithm name
    pub trainer_name: String,
    /// Optimizing metric value
    pub score: f64,
    /// Trial duration in seconds
    pub runtime_seconds: f64,
    /// All reported metrics
    pub metrics: BTreeMap<String, f64>,
}

/// Summary of a finished experiment, suitable for JSON export or printing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    /// Task, if declared
    pub task: Option<TaskKind>,
    /// Dataset display name
    pub dataset: String,
    /// Label column
    pub label: String,
    /// Optimizing metric name
    pub metric: String,
    /// Sum of trial runtimes in seconds
    pub experiment_seconds: f64,
    /// Number of trials observed
    pub models_explored: usize,
    /// Top trials, best first
    pub algorithms: Vec<AlgorithmSummary>,
}

const TABLE_WIDTH: usize = 114;

fn row(f: &mut fmt::Formatter<'_>, content: &str) -> fmt::Result {
    writeln!(f, "|{content:<width$}|", width = TABLE_WIDTH - 2)
}

fn separator(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", "-".repeat(TABLE_WIDTH))
}

fn centered(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    row(f, &format!("{title:^width$}", width = TABLE_WIDTH - 2))
}

impl fmt::Display for TrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=^width$}", "Experiment Results", width = TABLE_WIDTH)?;
        separator(f)?;
        centered(f, "Summary")?;
        separator(f)?;
        let task = self.task.map_or("-", TaskKind::display_name);
        row(f, &format!("{:<7}: {task}", "ML Task"))?;
        row(f, &format!("{:<7}: {}", "Dataset", self.dataset))?;
        row(f, &format!("{:<7}: {}", "Label", self.label))?;
        row(
            f,
            &format!("{:<31}: {:.1} Secs", "Total experiment time", self.experiment_seconds),
        )?;
        row(
            f,
            &format!("{:<31}: {}", "Total number of models explored", self.models_explored),
        )?;
        separator(f)?;

        centered(f, &format!("Top {} models explored", self.algorithms.len()))?;
        separator(f)?;

        let columns: Vec<&str> = self.task.map_or_else(
            || vec![self.metric.as_str()],
            |task| task.reported_metrics().to_vec(),
        );
        let mut header = format!("{:<4} {:<30}", "", "Trainer");
        for column in &columns {
            header.push_str(&format!(" {column:>13}"));
        }
        header.push_str(&format!(" {:>9} {:>10}", "Duration", "#Iteration"));
        row(f, &header)?;

        for (rank, algorithm) in self.algorithms.iter().enumerate() {
            let mut line = format!("{:<4} {:<30}", rank + 1, algorithm.trainer_name);
            for column in &columns {
                let value = algorithm.metrics.get(*column).copied().unwrap_or(f64::NAN);
                line.push_str(&format!(" {value:>13.4}"));
            }
            line.push_str(&format!(
                " {:>9.1} {:>10}",
                algorithm.runtime_seconds, algorithm.iteration
            ));
            row(f, &line)?;
        }
        separator(f)
    }
}
