//! Trial engine contract
//!
//! A [`TrialEngine`] proposes and evaluates pipelines on its own tokio task and
//! streams each finished [`TrialRun`] to the coordinator through a bounded
//! channel.
//!
//! Toyota Way: Heijunka (Load Balancing)
//! - Bounded channel: an engine can never run far ahead of bookkeeping
//! - Single receiver: trials are scored one at a time, in arrival order
//! - Stop is cooperative: the engine watches a [`CancellationSignal`]

pub mod sweep;

use crate::experiment::{CancellationSignal, TrialRun};
use crate::metric::OptimizingMetric;
use crate::split::DatasetSplit;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use sweep::{FittedTrial, PipelineCandidate, SweepEngine, Trainer, TrainerError};

/// Default number of finished trials buffered between engine and coordinator
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Everything an engine needs to run trials.
#[derive(Debug)]
pub struct TrialRequest<D> {
    /// Train/validation folds, shared read-only
    pub split: Arc<DatasetSplit<D>>,
    /// Label column name
    pub label_column: String,
    /// Metric each trial must report as its score
    pub metric: OptimizingMetric,
    /// Fires when the coordinator wants no more trials
    pub stop: CancellationSignal,
    /// Capacity of the trial channel
    pub channel_capacity: usize,
}

/// Source of pipeline trials.
pub trait TrialEngine<D>: Send + Sync {
    /// Fitted model type carried by successful trials
    type Artifact: Send + Sync + 'static;

    /// Start producing trials.
    ///
    /// Must be called inside a tokio runtime. The engine stops when it runs
    /// out of pipelines or when `request.stop` fires; either way it closes the
    /// stream by dropping its sender.
    fn start(&self, request: TrialRequest<D>) -> TrialStream<Self::Artifact>;
}

/// Engine side of the trial channel.
#[derive(Debug)]
pub struct TrialSender<A> {
    sender: mpsc::Sender<TrialRun<A>>,
}

impl<A> Clone for TrialSender<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A> TrialSender<A> {
    /// Send a finished trial, waiting while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the coordinator closed the stream
    pub async fn send(&self, trial: TrialRun<A>) -> Result<()> {
        self.sender.send(trial).await.map_err(|_| Error::QueueClosed)
    }

    /// `true` once the coordinator closed the stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Coordinator side of the trial channel, plus the engine task handle.
#[derive(Debug)]
pub struct TrialStream<A> {
    receiver: mpsc::Receiver<TrialRun<A>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl<A: Send + 'static> TrialStream<A> {
    /// Spawn `producer` on the runtime and return the stream it feeds.
    ///
    /// The stream ends when the producer returns (its sender is dropped).
    #[must_use]
    pub fn spawn<F, Fut>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(TrialSender<A>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(producer(TrialSender { sender }));
        Self {
            receiver,
            handle: Some(handle),
        }
    }
}

impl<A> TrialStream<A> {
    /// Build a stream fed by the returned sender, without an engine task.
    #[must_use]
    pub fn channel(capacity: usize) -> (TrialSender<A>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            TrialSender { sender },
            Self {
                receiver,
                handle: None,
            },
        )
    }

    /// Next finished trial; `None` once the engine is done and the buffer
    /// is drained.
    pub async fn next_trial(&mut self) -> Option<TrialRun<A>> {
        self.receiver.recv().await
    }

    /// Buffered trial, if one is ready right now.
    pub fn try_next_trial(&mut self) -> Option<TrialRun<A>> {
        self.receiver.try_recv().ok()
    }

    /// Stop accepting trials. Buffered trials stay readable through
    /// [`TrialStream::try_next_trial`]; further engine sends fail.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Abort the engine task if it is still running.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Wait for the engine task to finish.
    ///
    /// # Errors
    ///
    /// Returns `EngineFatal` if the engine returned an error or panicked
    pub async fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        // The handle stays in place until the task finishes, so a caller that
        // gives up waiting can still abort it.
        let joined = handle.await;
        self.handle = None;
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::EngineFatal(message))) => Err(Error::EngineFatal(message)),
            Ok(Err(e)) => Err(Error::EngineFatal(e.to_string())),
            Err(e) if e.is_panic() => Err(Error::EngineFatal("engine task panicked".to_string())),
            Err(e) => Err(Error::EngineFatal(format!("engine task was cancelled: {e}"))),
        }
    }
}

impl<A> Drop for TrialStream<A> {
    fn drop(&mut self) {
        self.abort();
    }
}
