//! Experiment coordinator
//!
//! Drives one experiment through `Planning → Running → {Completed,
//! UserCancelled, Failed}`:
//!
//! 1. Planning: validate the request, choose the validation strategy, build
//!    the folds.
//! 2. Running: start the engine and race every wait for the next trial
//!    against user cancellation and the time budget.
//! 3. Stopping: ask the engine to stop, keep draining its trials for the
//!    grace period, then settle the terminal state.
//!
//! All bookkeeping happens on the task calling [`ExperimentCoordinator::run`];
//! the engine only ever hands finished trials over a bounded channel.

use super::observer::{ExperimentSummaryEvent, ProgressObserver, TrialProgress};
use super::race::{race, resolve_timeout, CancellationSignal, CancellationSource, RaceOutcome};
use super::report::{ExperimentReport, StopCause, TerminationReason};
use super::tracker::BestTrialTracker;
use super::trial::TrialRun;
use crate::config::{Budget, ExperimentConfig};
use crate::dataset::Dataset;
use crate::engine::{TrialEngine, TrialRequest, TrialStream};
use crate::metric::{OptimizingMetric, TaskKind};
use crate::split::{DatasetSplit, Fold, SplitExecutor, SplitPlan};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentState {
    /// Validating input and building folds
    Planning,
    /// Trials are being received
    Running,
    /// Ran to completion (engine exhausted, budget reached, or timed out
    /// with a usable model)
    Completed,
    /// Cancelled by the user
    UserCancelled,
    /// Aborted with an error
    Failed,
}

impl ExperimentState {
    /// `true` once no further trial is accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::UserCancelled | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::Running | Self::Failed)
                | (
                    Self::Running,
                    Self::Completed | Self::UserCancelled | Self::Failed
                )
        )
    }
}

/// Input of one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentRequest<D> {
    /// Training data, shared read-only with the engine
    pub dataset: Arc<D>,
    /// Column to predict
    pub label_column: String,
    /// Caller-chosen validation rows; forces hold-out when present
    pub validation: Option<Arc<D>>,
    /// Metric trials are ranked by
    pub metric: OptimizingMetric,
    /// Time and trial limits
    pub budget: Budget,
    /// Task, for reporting
    pub task: Option<TaskKind>,
    /// Dataset display name, for reporting
    pub dataset_name: String,
}

impl<D> ExperimentRequest<D> {
    /// Create a request with no validation dataset and no declared task.
    #[must_use]
    pub fn new(
        dataset: Arc<D>,
        label_column: impl Into<String>,
        metric: OptimizingMetric,
        budget: Budget,
    ) -> Self {
        Self {
            dataset,
            label_column: label_column.into(),
            validation: None,
            metric,
            budget,
            task: None,
            dataset_name: String::new(),
        }
    }

    /// Validate on `validation` instead of splitting the training data.
    #[must_use]
    pub fn with_validation(mut self, validation: Arc<D>) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Declare the task.
    #[must_use]
    pub const fn with_task(mut self, task: TaskKind) -> Self {
        self.task = Some(task);
        self
    }

    /// Set the dataset display name.
    #[must_use]
    pub fn with_dataset_name(mut self, name: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self
    }
}

/// Trials and rankings of the run in progress.
struct RunProgress<A> {
    metric: String,
    tracker: BestTrialTracker<A>,
    trials: Vec<TrialRun<A>>,
    max_trials: Option<usize>,
}

impl<A> RunProgress<A> {
    fn is_full(&self) -> bool {
        self.max_trials
            .is_some_and(|max_trials| self.trials.len() >= max_trials)
    }

    fn successful_trials(&self) -> usize {
        usize::try_from(self.tracker.successful_trials()).unwrap_or(usize::MAX)
    }

    /// Trials that produced no rankable model (failures and NaN scores).
    fn unscored_trials(&self) -> usize {
        self.trials.len().saturating_sub(self.successful_trials())
    }
}

/// Runs experiments with an injected engine, split executor and observers.
pub struct ExperimentCoordinator<D, E, S> {
    engine: E,
    splitter: S,
    config: ExperimentConfig,
    observers: Vec<Box<dyn ProgressObserver>>,
    state: ExperimentState,
    _dataset: PhantomData<fn() -> D>,
}

impl<D, E, S> ExperimentCoordinator<D, E, S>
where
    D: Dataset + Clone,
    E: TrialEngine<D>,
    S: SplitExecutor<D>,
{
    /// Create a coordinator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `config` fails validation
    pub fn new(engine: E, splitter: S, config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            splitter,
            config,
            observers: Vec::new(),
            state: ExperimentState::Planning,
            _dataset: PhantomData,
        })
    }

    /// Add a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Add a boxed progress observer.
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// State of the current (or last) run.
    #[must_use]
    pub const fn state(&self) -> ExperimentState {
        self.state
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run one experiment to a terminal state.
    ///
    /// `cancellation` is the user's cancel switch. A cancelled run still
    /// returns `Ok` with the trials gathered so far.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` / `Split` if planning fails
    /// - `EngineFatal` if the engine fails or reports a fatal trial
    /// - `NoTrialsBeforeTimeout` if the time budget elapsed before any trial
    ///   succeeded
    pub async fn run(
        &mut self,
        request: ExperimentRequest<D>,
        mut cancellation: CancellationSignal,
    ) -> Result<ExperimentReport<E::Artifact>> {
        self.state = ExperimentState::Planning;
        let started_at = Utc::now();
        tracing::info!(
            dataset = %request.dataset_name,
            label = %request.label_column,
            metric = request.metric.name(),
            "planning experiment"
        );

        let (plan, split) = match self.plan(&request) {
            Ok(planned) => planned,
            Err(e) => {
                tracing::warn!(error = %e, "experiment planning failed");
                self.transition(ExperimentState::Failed);
                return Err(e);
            }
        };
        let mut progress = RunProgress {
            metric: request.metric.name().to_string(),
            tracker: BestTrialTracker::new(request.metric.ordering(), self.config.top_n)?,
            trials: Vec::new(),
            max_trials: request.budget.max_trials(),
        };
        for observer in &mut self.observers {
            tracing::debug!(observer = observer.name(), "notifying observer of experiment start");
            observer.on_experiment_start(&plan);
        }

        let engine_stop = CancellationSource::new();
        self.transition(ExperimentState::Running);
        let mut stream = self.engine.start(TrialRequest {
            split: Arc::new(split),
            label_column: request.label_column.clone(),
            metric: request.metric.clone(),
            stop: engine_stop.signal(),
            channel_capacity: self.config.channel_capacity,
        });
        let deadline = request.budget.max_time().map(|max_time| Instant::now() + max_time);

        let stop_cause = loop {
            match race(stream.next_trial(), &mut cancellation, deadline).await {
                RaceOutcome::Completed(Some(trial)) => {
                    if let Some(message) = self.record(&mut progress, trial) {
                        return Err(self.abort(&engine_stop, &mut stream, message));
                    }
                    if progress.is_full() {
                        break StopCause::TrialBudgetReached;
                    }
                }
                RaceOutcome::Completed(None) => {
                    let grace_deadline = Instant::now() + self.config.grace_period();
                    if let Err(e) = self.finish_engine(&mut stream, grace_deadline).await {
                        tracing::error!(error = %e, "trial engine failed");
                        self.transition(ExperimentState::Failed);
                        return Err(e);
                    }
                    break StopCause::EngineExhausted;
                }
                RaceOutcome::UserCancelled => break StopCause::UserCancelled,
                RaceOutcome::TimedOut => break StopCause::TimeBudgetElapsed,
            }
        };

        if stop_cause != StopCause::EngineExhausted {
            tracing::info!(cause = ?stop_cause, "stopping trial engine");
            engine_stop.cancel();
            if let Some(message) = self.drain(&mut progress, &mut stream).await {
                return Err(self.abort(&engine_stop, &mut stream, message));
            }
        }

        let termination_reason = match stop_cause {
            StopCause::UserCancelled => TerminationReason::UserCancelled,
            StopCause::TimeBudgetElapsed => {
                match resolve_timeout(
                    progress.successful_trials(),
                    progress.unscored_trials(),
                    request.budget.max_time_seconds(),
                ) {
                    Ok(reason) => reason,
                    Err(e) => {
                        tracing::warn!(error = %e, "time budget elapsed without a model");
                        self.transition(ExperimentState::Failed);
                        return Err(e);
                    }
                }
            }
            StopCause::EngineExhausted | StopCause::TrialBudgetReached => {
                TerminationReason::Completed
            }
        };
        self.transition(match termination_reason {
            TerminationReason::Completed => ExperimentState::Completed,
            TerminationReason::UserCancelled => ExperimentState::UserCancelled,
        });
        self.discard_late_trials(&mut progress, &mut stream);

        let state = progress.tracker.into_state();
        let report = ExperimentReport {
            task: request.task,
            dataset_name: request.dataset_name,
            label_column: request.label_column,
            metric: request.metric,
            split_plan: plan,
            best_trial: state.best,
            top_trials: state.top,
            all_trials: progress.trials,
            termination_reason,
            stop_cause,
            started_at,
            finished_at: Utc::now(),
        };

        let summary = ExperimentSummaryEvent {
            termination_reason,
            stop_cause,
            trial_count: report.trial_count(),
            failed_trials: report.failed_trial_count(),
            elapsed_seconds: report.elapsed_seconds(),
            best_score: report.best_trial().and_then(TrialRun::score),
            best_trainer: report
                .best_trial()
                .map(|trial| trial.trainer_name().to_string()),
        };
        tracing::info!(
            reason = ?termination_reason,
            cause = ?stop_cause,
            trials = summary.trial_count,
            best_score = summary.best_score,
            "experiment finished"
        );
        for observer in &mut self.observers {
            observer.on_experiment_end(&summary);
        }
        Ok(report)
    }

    fn plan(&self, request: &ExperimentRequest<D>) -> Result<(SplitPlan, DatasetSplit<D>)> {
        if request.metric.name().trim().is_empty() {
            return Err(Error::InvalidInput(
                "optimizing metric name is empty".to_string(),
            ));
        }
        request.budget.validate()?;
        check_label(request.dataset.as_ref(), &request.label_column, "training")?;
        if let Some(validation) = &request.validation {
            if validation.row_count() == 0 {
                return Err(Error::InvalidInput(
                    "validation dataset is empty (0 rows)".to_string(),
                ));
            }
            check_label(validation.as_ref(), &request.label_column, "validation")?;
        }

        let plan = self
            .config
            .split_planner()
            .plan_with_validation(request.dataset.row_count(), request.validation.is_some())?;
        tracing::info!(
            rows = plan.row_count(),
            strategy = ?plan.strategy(),
            "validation strategy chosen"
        );

        let split = match &request.validation {
            Some(validation) => DatasetSplit::new(
                plan,
                vec![Fold {
                    train: request.dataset.as_ref().clone(),
                    validation: validation.as_ref().clone(),
                }],
            )?,
            None => self.splitter.execute(request.dataset.as_ref(), &plan)?,
        };
        Ok((plan, split))
    }

    /// Record one trial. Returns the abort message for a fatal failure.
    fn record(
        &mut self,
        progress: &mut RunProgress<E::Artifact>,
        trial: TrialRun<E::Artifact>,
    ) -> Option<String> {
        if self.state != ExperimentState::Running {
            tracing::warn!(
                state = ?self.state,
                trainer = trial.trainer_name(),
                "discarding trial received after the experiment finished"
            );
            return None;
        }
        if progress.is_full() {
            tracing::warn!(
                trainer = trial.trainer_name(),
                "discarding trial beyond the trial budget"
            );
            return None;
        }

        let reported_success = trial.is_success();
        let trial = trial
            .verify_score(&progress.metric)
            .with_index(progress.trials.len());
        if reported_success && !trial.is_success() {
            tracing::warn!(
                trainer = trial.trainer_name(),
                failure = ?trial.failure().map(super::trial::TrialFailure::message),
                "trial score rejected"
            );
        }
        let observation = progress.tracker.observe(&trial);
        let event = TrialProgress::from_trial(
            &trial,
            observation.is_new_best(),
            progress.tracker.best_score(),
        );
        tracing::debug!(
            iteration = trial.index(),
            trainer = trial.trainer_name(),
            score = trial.score(),
            observation = ?observation,
            "trial recorded"
        );

        let fatal = trial
            .failure()
            .filter(|failure| failure.is_fatal())
            .map(|failure| {
                format!(
                    "trial {} ({}) failed fatally: {}",
                    trial.index(),
                    trial.trainer_name(),
                    failure
                )
            });
        progress.trials.push(trial.without_artifact());
        for observer in &mut self.observers {
            observer.on_trial(&event);
        }
        fatal
    }

    /// Keep receiving trials until the engine closes its stream or the grace
    /// period ends.
    async fn drain(
        &mut self,
        progress: &mut RunProgress<E::Artifact>,
        stream: &mut TrialStream<E::Artifact>,
    ) -> Option<String> {
        let grace_deadline = Instant::now() + self.config.grace_period();
        loop {
            match tokio::time::timeout_at(grace_deadline, stream.next_trial()).await {
                Ok(Some(trial)) => {
                    if let Some(message) = self.record(progress, trial) {
                        return Some(message);
                    }
                }
                Ok(None) => {
                    if let Err(e) = self.finish_engine(stream, grace_deadline).await {
                        tracing::warn!(error = %e, "trial engine failed while stopping");
                    }
                    return None;
                }
                Err(_) => {
                    tracing::warn!(
                        grace_ms = self.config.grace_period_ms,
                        "trial engine did not stop within the grace period"
                    );
                    stream.abort();
                    return None;
                }
            }
        }
    }

    /// Join an engine whose stream has ended. A task still running at
    /// `deadline` is aborted.
    async fn finish_engine(
        &self,
        stream: &mut TrialStream<E::Artifact>,
        deadline: Instant,
    ) -> Result<()> {
        match tokio::time::timeout_at(deadline, stream.join()).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.config.grace_period_ms,
                    "trial engine closed its stream but did not exit; aborting it"
                );
                stream.abort();
                Ok(())
            }
        }
    }

    fn discard_late_trials(
        &mut self,
        progress: &mut RunProgress<E::Artifact>,
        stream: &mut TrialStream<E::Artifact>,
    ) {
        stream.close();
        while let Some(trial) = stream.try_next_trial() {
            self.record(progress, trial);
        }
        stream.abort();
    }

    fn abort(
        &mut self,
        engine_stop: &CancellationSource,
        stream: &mut TrialStream<E::Artifact>,
        message: String,
    ) -> Error {
        tracing::error!(%message, "aborting experiment");
        engine_stop.cancel();
        stream.close();
        stream.abort();
        self.transition(ExperimentState::Failed);
        Error::EngineFatal(message)
    }

    fn transition(&mut self, next: ExperimentState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::info!(from = ?self.state, to = ?next, "experiment state changed");
        self.state = next;
    }
}

fn check_label<D: Dataset>(dataset: &D, label_column: &str, role: &str) -> Result<()> {
    if dataset.has_column(label_column) {
        return Ok(());
    }
    Err(Error::InvalidInput(format!(
        "label column '{label_column}' not found in {role} dataset; available columns: [{}]",
        dataset.column_names().join(", ")
    )))
}
