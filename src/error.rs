//! Error types for trueno-automl
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Trial-scoped failures are *not* errors: they are recorded on the
//! [`TrialRun`](crate::experiment::TrialRun) and the experiment continues.
//! User cancellation is not an error either: it is a terminal outcome that
//! carries a partial report.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-automl error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid experiment input (empty dataset, missing label, bad budget)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The trial engine cannot proceed at all
    #[error("Trial engine failed: {0}\nThe experiment was aborted; no report was produced.")]
    EngineFatal(String),

    /// Time budget elapsed before any trial succeeded
    #[error(
        "Training time of {budget_seconds:.1}s finished without any models trained \
         ({failed_trials} failed trials).\nIncrease the time budget or check the trial failures."
    )]
    NoTrialsBeforeTimeout {
        /// Time budget that elapsed
        budget_seconds: f64,
        /// Trials that finished before the deadline without a usable score
        failed_trials: usize,
    },

    /// Split executor could not build train/validation folds
    #[error("Dataset split failed: {0}")]
    Split(String),

    /// Trial channel closed (the coordinator stopped listening)
    #[error("Trial channel closed")]
    QueueClosed,

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Whether the error means the experiment could not run at all.
    ///
    /// `NoTrialsBeforeTimeout` is the only non-fatal error: the experiment ran
    /// but ran out of time before producing a usable model.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoTrialsBeforeTimeout { .. })
    }
}
