//! # Trueno-AutoML: Experiment Execution Coordinator
//!
//! **Version**: 0.1.0
//!
//! Trueno-AutoML runs budgeted AutoML experiments: it picks a validation
//! strategy from the dataset size, drives a pipeline-trial engine under a
//! cooperative cancellation / timeout race, tracks the best trial under a
//! maximize or minimize metric, and folds everything into a final report.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: A fatal engine failure stops the line; a failed trial does not
//! - **Poka-Yoke**: Timeout, cancellation and completion are distinct outcomes
//! - **Heijunka**: Bounded trial channel between engine and bookkeeping
//! - **Genchi Genbutsu**: Every trial is kept in the report, failures included
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trueno_automl::config::{Budget, ExperimentConfig};
//! use trueno_automl::dataset::TableDataset;
//! use trueno_automl::engine::{FittedTrial, PipelineCandidate, SweepEngine, Trainer, TrainerError};
//! use trueno_automl::experiment::{CancellationSource, ExperimentCoordinator, ExperimentRequest};
//! use trueno_automl::metric::TaskKind;
//! use trueno_automl::split::RowSplitter;
//!
//! struct Baseline;
//!
//! impl Trainer<TableDataset> for Baseline {
//!     type Params = ();
//!     type Model = ();
//!
//!     fn fit(&self, _: &(), _: &TableDataset, _: &TableDataset, _: &str)
//!         -> Result<FittedTrial<()>, TrainerError> {
//!         Ok(FittedTrial { model: (), metrics: [("RSquared".to_string(), 0.0)].into() })
//!     }
//! }
//!
//! # async fn run() -> trueno_automl::Result<()> {
//! let dataset = Arc::new(TableDataset::load_parquet("data/housing.parquet")?);
//! let engine = SweepEngine::new(Baseline, vec![PipelineCandidate::new("mean", "Baseline", ())]);
//! let mut coordinator =
//!     ExperimentCoordinator::new(engine, RowSplitter::default(), ExperimentConfig::default())?;
//!
//! let request = ExperimentRequest::new(
//!     dataset,
//!     "price",
//!     TaskKind::Regression.default_metric(),
//!     Budget::time(60),
//! );
//! let cancel = CancellationSource::new();
//! let report = coordinator.run(request, cancel.signal()).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod metric;
pub mod split;

pub use error::{Error, Result};
