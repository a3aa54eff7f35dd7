//! Experiment execution
//!
//! Everything between "here is a dataset and a budget" and "here is the best
//! model": trial records, best-trial tracking, the cancellation race, progress
//! observers, the coordinator state machine and its final report.
//!
//! ## Flow
//!
//! ```text
//! ExperimentCoordinator::run
//!     ├─ SplitPlanner / SplitExecutor      (once, Planning)
//!     ├─ TrialEngine ──mpsc──> TrialRun    (Running)
//!     │      └─ race(next trial, user cancel, deadline)
//!     ├─ BestTrialTracker::observe         (per trial)
//!     ├─ ProgressObserver::on_trial        (per trial)
//!     └─ ExperimentReport                  (Completed / UserCancelled)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_automl::experiment::{BestTrialTracker, TrialRun};
//! use trueno_automl::metric::MetricOrdering;
//! use std::collections::BTreeMap;
//!
//! let mut tracker = BestTrialTracker::new(MetricOrdering::minimizing(), 5)?;
//! for (i, loss) in [0.4, 0.2, 0.3].into_iter().enumerate() {
//!     let metrics = BTreeMap::from([("RMS-loss".to_string(), loss)]);
//!     tracker.observe(&TrialRun::success(format!("p{i}"), "Sdca", metrics, loss, 1.0, ()));
//! }
//! assert_eq!(tracker.best_score(), Some(0.2));
//! # Ok::<(), trueno_automl::Error>(())
//! ```

mod coordinator;
mod observer;
mod race;
mod report;
mod tracker;
mod trial;

pub use coordinator::{ExperimentCoordinator, ExperimentRequest, ExperimentState};
pub use observer::{ExperimentSummaryEvent, LoggingObserver, ProgressObserver, TrialProgress};
pub use race::{race, resolve_timeout, CancellationSignal, CancellationSource, RaceOutcome};
pub use report::{
    AlgorithmSummary, ExperimentOutcome, ExperimentReport, StopCause, TerminationReason,
    TrainSummary,
};
pub use tracker::{BestTrialState, BestTrialTracker, Observation, DEFAULT_TOP_N};
pub use trial::{FailureKind, TrialFailure, TrialRun};
