//! Cancellation race: user cancellation vs. time budget vs. work
//!
//! Every wait of the coordinator goes through [`race`], a biased
//! `tokio::select!` over three branches. Exactly one of the three outcomes
//! is produced, so "cancelled by the user" and "ran out of time" can never
//! be confused.
//!
//! Cancellation is cooperative: a [`CancellationSource`] flips a
//! `tokio::sync::watch` flag that running work observes through its
//! [`CancellationSignal`].

use super::report::TerminationReason;
use crate::{Error, Result};
use std::future::Future;
use tokio::sync::watch;
use tokio::time::Instant;

/// Owner side of a cancellation flag.
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    /// Create a source that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a signal observing this source.
    #[must_use]
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        drop(sender);
        Self { receiver }
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// Pending forever if the source is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Which of the three raced events happened first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<R> {
    /// The work finished first.
    Completed(R),
    /// The user cancelled first.
    UserCancelled,
    /// The deadline passed first.
    TimedOut,
}

/// Race `work` against user cancellation and an optional deadline.
///
/// Branches are polled in priority order: user cancellation, then deadline,
/// then work. A cancellation already requested therefore wins even if the
/// work is ready. When `work` loses, it is dropped.
pub async fn race<F>(
    work: F,
    user: &mut CancellationSignal,
    deadline: Option<Instant>,
) -> RaceOutcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = user.cancelled() => RaceOutcome::UserCancelled,
        () = sleep_until(deadline) => RaceOutcome::TimedOut,
        output = work => RaceOutcome::Completed(output),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Decide how a time-budget expiry ends the experiment.
///
/// A timeout with at least one usable model is a normal completion; a timeout
/// with none is an error, so callers never mistake "no time to try anything"
/// for "zero viable pipelines".
///
/// # Errors
///
/// Returns `NoTrialsBeforeTimeout` when no trial succeeded
pub fn resolve_timeout(
    successful_trials: usize,
    failed_trials: usize,
    budget_seconds: f64,
) -> Result<TerminationReason> {
    if successful_trials == 0 {
        return Err(Error::NoTrialsBeforeTimeout {
            budget_seconds,
            failed_trials,
        });
    }
    Ok(TerminationReason::Completed)
}
