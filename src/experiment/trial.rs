//! Trial Run - immutable record of one pipeline evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How far a trial failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Only this pipeline failed; the experiment continues.
    Trial,
    /// The failure means no further trial can succeed (e.g. a native
    /// dependency failed to load); the experiment is aborted.
    Fatal,
}

/// Why a trial did not produce a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    kind: FailureKind,
    message: String,
}

impl TrialFailure {
    /// A failure scoped to one trial.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Trial,
            message: message.into(),
        }
    }

    /// A failure that aborts the whole experiment.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Failure scope.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// `true` for [`FailureKind::Fatal`].
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, FailureKind::Fatal)
    }

    /// Error description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// One completed pipeline trial.
///
/// Created by the trial engine the moment a trial finishes, successfully or
/// not; never mutated afterwards except for the completion index the
/// coordinator assigns and the artifact it may release.
///
/// `A` is the fitted model type. It is held behind an `Arc` so the best-trial
/// tracker and the report can share it without copying.
#[derive(Debug, Serialize)]
pub struct TrialRun<A> {
    index: usize,
    pipeline: String,
    trainer_name: String,
    metrics: BTreeMap<String, f64>,
    score: Option<f64>,
    runtime_seconds: f64,
    failure: Option<TrialFailure>,
    completed_at: DateTime<Utc>,
    #[serde(skip)]
    artifact: Option<Arc<A>>,
}

impl<A> Clone for TrialRun<A> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            pipeline: self.pipeline.clone(),
            trainer_name: self.trainer_name.clone(),
            metrics: self.metrics.clone(),
            score: self.score,
            runtime_seconds: self.runtime_seconds,
            failure: self.failure.clone(),
            completed_at: self.completed_at,
            artifact: self.artifact.clone(),
        }
    }
}

impl<A> TrialRun<A> {
    /// Record a successful trial.
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Description of the transforms + trainer evaluated
    /// * `trainer_name` - Trainer algorithm name
    /// * `metrics` - Validation metrics by name
    /// * `score` - Value of the optimizing metric
    /// * `runtime_seconds` - Wall-clock duration (clamped to be non-negative)
    /// * `artifact` - Fitted model
    #[must_use]
    pub fn success(
        pipeline: impl Into<String>,
        trainer_name: impl Into<String>,
        metrics: BTreeMap<String, f64>,
        score: f64,
        runtime_seconds: f64,
        artifact: A,
    ) -> Self {
        Self {
            index: 0,
            pipeline: pipeline.into(),
            trainer_name: trainer_name.into(),
            metrics,
            score: Some(score),
            runtime_seconds: sanitize_runtime(runtime_seconds),
            failure: None,
            completed_at: Utc::now(),
            artifact: Some(Arc::new(artifact)),
        }
    }

    /// Record a failed trial.
    #[must_use]
    pub fn failed(
        pipeline: impl Into<String>,
        trainer_name: impl Into<String>,
        runtime_seconds: f64,
        failure: TrialFailure,
    ) -> Self {
        Self {
            index: 0,
            pipeline: pipeline.into(),
            trainer_name: trainer_name.into(),
            metrics: BTreeMap::new(),
            score: None,
            runtime_seconds: sanitize_runtime(runtime_seconds),
            failure: Some(failure),
            completed_at: Utc::now(),
            artifact: None,
        }
    }

    /// Completion index within the experiment (0-based).
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Pipeline description.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Trainer algorithm name.
    #[must_use]
    pub fn trainer_name(&self) -> &str {
        &self.trainer_name
    }

    /// Validation metrics (empty for failed trials).
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Look up one metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Optimizing metric value; `None` for failed trials.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }

    /// Wall-clock duration in seconds.
    #[must_use]
    pub const fn runtime_seconds(&self) -> f64 {
        self.runtime_seconds
    }

    /// Failure, if the trial did not succeed.
    #[must_use]
    pub const fn failure(&self) -> Option<&TrialFailure> {
        self.failure.as_ref()
    }

    /// `true` if the trial produced a scored model.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// When the trial finished.
    #[must_use]
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Fitted model, if still held.
    #[must_use]
    pub fn artifact(&self) -> Option<&A> {
        self.artifact.as_deref()
    }

    /// Shared handle to the fitted model.
    #[must_use]
    pub fn artifact_handle(&self) -> Option<Arc<A>> {
        self.artifact.clone()
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Check that a successful trial's score is the value it reports for
    /// `metric`. A missing or disagreeing metric turns the trial into a
    /// failure, so it can never be ranked.
    #[allow(clippy::float_cmp)]
    pub(crate) fn verify_score(self, metric: &str) -> Self {
        let Some(score) = self.score else {
            return self;
        };
        let message = match self.metrics.get(metric).copied() {
            None => format!("trial did not report optimizing metric '{metric}'"),
            Some(reported) if reported == score || (reported.is_nan() && score.is_nan()) => {
                return self;
            }
            Some(reported) => {
                format!("score {score} does not match reported {metric} = {reported}")
            }
        };
        Self {
            metrics: BTreeMap::new(),
            score: None,
            failure: Some(TrialFailure::new(message)),
            artifact: None,
            ..self
        }
    }

    /// Copy of this record without the fitted model.
    #[must_use]
    pub fn without_artifact(&self) -> Self {
        Self {
            artifact: None,
            ..self.clone()
        }
    }
}

fn sanitize_runtime(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
