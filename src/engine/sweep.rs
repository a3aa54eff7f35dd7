//! Reference sweep engine
//!
//! Evaluates a fixed list of pipeline candidates in order with one
//! [`Trainer`]. Each candidate is fitted on every fold in parallel (rayon,
//! inside `spawn_blocking` so the async runtime is never blocked), fold
//! metrics are averaged, and the model of the fold scoring closest to the
//! average is kept as the trial artifact.

use super::{TrialEngine, TrialRequest, TrialSender, TrialStream};
use crate::experiment::{CancellationSignal, TrialFailure, TrialRun};
use crate::split::DatasetSplit;
use crate::Result;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Error raised by a [`Trainer`] for one fit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TrainerError {
    message: String,
    fatal: bool,
}

impl TrainerError {
    /// Failure of this pipeline only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// Failure no other pipeline can avoid either (missing native library,
    /// unusable environment). Aborts the experiment.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    /// `true` if the experiment must be aborted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Error description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn into_failure(self) -> TrialFailure {
        if self.fatal {
            TrialFailure::fatal(self.message)
        } else {
            TrialFailure::new(self.message)
        }
    }
}

/// Model and validation metrics from fitting one fold.
#[derive(Debug, Clone)]
pub struct FittedTrial<M> {
    /// Fitted model
    pub model: M,
    /// Validation metrics by name
    pub metrics: BTreeMap<String, f64>,
}

/// Fits one pipeline on one train/validation pair.
///
/// Called from blocking threads, possibly for several folds at once.
pub trait Trainer<D>: Send + Sync + 'static {
    /// Pipeline hyperparameters
    type Params: Send + Sync + 'static;
    /// Fitted model
    type Model: Send + Sync + 'static;

    /// Fit `params` on `train` and score on `validation`.
    ///
    /// # Errors
    ///
    /// Returns a [`TrainerError`] if this pipeline cannot be fitted
    fn fit(
        &self,
        params: &Self::Params,
        train: &D,
        validation: &D,
        label_column: &str,
    ) -> std::result::Result<FittedTrial<Self::Model>, TrainerError>;
}

/// One pipeline to evaluate.
#[derive(Debug, Clone)]
pub struct PipelineCandidate<P> {
    /// Pipeline description (transforms + trainer)
    pub pipeline: String,
    /// Trainer algorithm name
    pub trainer_name: String,
    /// Hyperparameters handed to the trainer
    pub params: P,
}

impl<P> PipelineCandidate<P> {
    /// Create a candidate.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, trainer_name: impl Into<String>, params: P) -> Self {
        Self {
            pipeline: pipeline.into(),
            trainer_name: trainer_name.into(),
            params,
        }
    }
}

/// Engine evaluating a candidate list in order.
#[derive(Debug)]
pub struct SweepEngine<T, P> {
    trainer: Arc<T>,
    candidates: Arc<Vec<PipelineCandidate<P>>>,
}

impl<T, P> SweepEngine<T, P> {
    /// Create an engine sweeping `candidates` with `trainer`.
    #[must_use]
    pub fn new(trainer: T, candidates: Vec<PipelineCandidate<P>>) -> Self {
        Self {
            trainer: Arc::new(trainer),
            candidates: Arc::new(candidates),
        }
    }

    /// Candidates in evaluation order.
    #[must_use]
    pub fn candidates(&self) -> &[PipelineCandidate<P>] {
        &self.candidates
    }
}

impl<D, T, P> TrialEngine<D> for SweepEngine<T, P>
where
    D: Send + Sync + 'static,
    T: Trainer<D, Params = P>,
    P: Send + Sync + 'static,
{
    type Artifact = T::Model;

    fn start(&self, request: TrialRequest<D>) -> TrialStream<T::Model> {
        let trainer = Arc::clone(&self.trainer);
        let candidates = Arc::clone(&self.candidates);
        TrialStream::spawn(request.channel_capacity, move |sender| {
            sweep(trainer, candidates, request, sender)
        })
    }
}

async fn sweep<D, T>(
    trainer: Arc<T>,
    candidates: Arc<Vec<PipelineCandidate<T::Params>>>,
    request: TrialRequest<D>,
    sender: TrialSender<T::Model>,
) -> Result<()>
where
    D: Send + Sync + 'static,
    T: Trainer<D>,
{
    let TrialRequest {
        split,
        label_column,
        metric,
        mut stop,
        ..
    } = request;
    let metric_name = metric.name().to_string();

    for position in 0..candidates.len() {
        if stop.is_cancelled() {
            tracing::debug!(remaining = candidates.len() - position, "sweep stopped");
            break;
        }

        let started = Instant::now();
        let evaluation = {
            let trainer = Arc::clone(&trainer);
            let candidates = Arc::clone(&candidates);
            let split = Arc::clone(&split);
            let label_column = label_column.clone();
            let metric_name = metric_name.clone();
            tokio::task::spawn_blocking(move || {
                evaluate(
                    trainer.as_ref(),
                    &candidates[position].params,
                    &split,
                    &label_column,
                    &metric_name,
                )
            })
        };

        let Some(evaluation) = abandon_on_stop(evaluation, &mut stop).await else {
            tracing::debug!(
                pipeline = %candidates[position].pipeline,
                "abandoning in-flight trial after stop"
            );
            break;
        };

        let candidate = &candidates[position];
        let runtime_seconds = started.elapsed().as_secs_f64();
        let trial = match evaluation {
            Ok(Ok(evaluated)) => TrialRun::success(
                candidate.pipeline.clone(),
                candidate.trainer_name.clone(),
                evaluated.metrics,
                evaluated.score,
                runtime_seconds,
                evaluated.model,
            ),
            Ok(Err(e)) => TrialRun::failed(
                candidate.pipeline.clone(),
                candidate.trainer_name.clone(),
                runtime_seconds,
                e.into_failure(),
            ),
            Err(e) => TrialRun::failed(
                candidate.pipeline.clone(),
                candidate.trainer_name.clone(),
                runtime_seconds,
                TrialFailure::new(format!("trainer panicked: {e}")),
            ),
        };

        if sender.send(trial).await.is_err() {
            tracing::debug!("trial stream closed, sweep stopped");
            break;
        }
    }
    Ok(())
}

async fn abandon_on_stop<R>(
    evaluation: tokio::task::JoinHandle<R>,
    stop: &mut CancellationSignal,
) -> Option<std::result::Result<R, tokio::task::JoinError>> {
    tokio::select! {
        biased;
        () = stop.cancelled() => None,
        joined = evaluation => Some(joined),
    }
}

struct Evaluated<M> {
    metrics: BTreeMap<String, f64>,
    score: f64,
    model: M,
}

fn evaluate<D, T>(
    trainer: &T,
    params: &T::Params,
    split: &DatasetSplit<D>,
    label_column: &str,
    metric_name: &str,
) -> std::result::Result<Evaluated<T::Model>, TrainerError>
where
    D: Send + Sync,
    T: Trainer<D>,
{
    let results: Vec<_> = split
        .folds()
        .par_iter()
        .map(|fold| trainer.fit(params, &fold.train, &fold.validation, label_column))
        .collect();

    // A fatal fold error wins over an ordinary one; otherwise the first in fold order.
    let mut fitted = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(fit) => fitted.push(fit),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let metrics = average_metrics(&fitted);
    let score = metrics.get(metric_name).copied().ok_or_else(|| {
        TrainerError::new(format!("trainer did not report metric '{metric_name}'"))
    })?;

    // Keep the fold model whose score is closest to the cross-fold average.
    let model = fitted
        .into_iter()
        .min_by(|a, b| {
            let distance = |fit: &FittedTrial<T::Model>| {
                fit.metrics
                    .get(metric_name)
                    .map_or(f64::INFINITY, |value| (value - score).abs())
            };
            distance(a).total_cmp(&distance(b))
        })
        .map(|fit| fit.model)
        .ok_or_else(|| TrainerError::new("dataset split has no folds"))?;

    Ok(Evaluated {
        metrics,
        score,
        model,
    })
}

/// Mean of every metric reported by all folds.
#[allow(clippy::cast_precision_loss)]
fn average_metrics<M>(fitted: &[FittedTrial<M>]) -> BTreeMap<String, f64> {
    let Some(first) = fitted.first() else {
        return BTreeMap::new();
    };
    first
        .metrics
        .keys()
        .filter_map(|name| {
            let values: Vec<f64> = fitted
                .iter()
                .filter_map(|fit| fit.metrics.get(name).copied())
                .collect();
            (values.len() == fitted.len())
                .then(|| (name.clone(), values.iter().sum::<f64>() / values.len() as f64))
        })
        .collect()
}
