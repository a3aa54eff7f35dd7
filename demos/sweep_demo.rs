//! Sweep Demo: budgeted AutoML experiment over a synthetic dataset
//!
//! Trains a family of threshold classifiers on a generated binary
//! classification table, racing the sweep against a time budget and Ctrl-C.
//!
//! Run with: cargo run --example sweep_demo -- [budget_seconds]
//!
//! Set `RUST_LOG=trueno_automl=debug` to see every trial as it lands.

use anyhow::Context;
use arrow::array::{Array, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use trueno_automl::config::{Budget, ExperimentConfig};
use trueno_automl::dataset::TableDataset;
use trueno_automl::engine::{FittedTrial, PipelineCandidate, SweepEngine, Trainer, TrainerError};
use trueno_automl::experiment::{
    CancellationSource, ExperimentCoordinator, ExperimentOutcome, ExperimentRequest,
    LoggingObserver,
};
use trueno_automl::metric::TaskKind;

/// `label = 1` when `x + noise > 0.6`
fn synthetic_dataset(rows: usize) -> anyhow::Result<TableDataset> {
    let mut rng = StdRng::seed_from_u64(7);
    let xs: Vec<f64> = (0..rows).map(|_| rng.gen()).collect();
    let labels: Vec<f64> = xs
        .iter()
        .map(|x| if x + rng.gen_range(-0.1..0.1) > 0.6 { 1.0 } else { 0.0 })
        .collect();

    let schema = Schema::new(vec![
        Field::new("x", DataType::Float64, false),
        Field::new("label", DataType::Float64, false),
    ]);
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(Float64Array::from(xs)), Arc::new(Float64Array::from(labels))],
    )?;
    Ok(TableDataset::from_batches(vec![batch])?)
}

fn column(dataset: &TableDataset, name: &str) -> Vec<f64> {
    let mut values = Vec::with_capacity(dataset.batches().iter().map(RecordBatch::num_rows).sum());
    for batch in dataset.batches() {
        if let Some(array) = batch
            .column_by_name(name)
            .and_then(|array| array.as_any().downcast_ref::<Float64Array>())
        {
            values.extend((0..array.len()).map(|i| array.value(i)));
        }
    }
    values
}

/// Predicts positive when `x > threshold`. Training data is unused.
struct ThresholdClassifier;

impl Trainer<TableDataset> for ThresholdClassifier {
    type Params = f64;
    type Model = f64;

    #[allow(clippy::cast_precision_loss)]
    fn fit(
        &self,
        threshold: &f64,
        _train: &TableDataset,
        validation: &TableDataset,
        label_column: &str,
    ) -> Result<FittedTrial<f64>, TrainerError> {
        let xs = column(validation, "x");
        let labels = column(validation, label_column);
        if xs.is_empty() || xs.len() != labels.len() {
            return Err(TrainerError::new("expected Float64 columns 'x' and label"));
        }

        let (mut tp, mut fp, mut fn_, mut correct) = (0.0, 0.0, 0.0, 0.0);
        for (x, label) in xs.iter().zip(&labels) {
            let predicted = *x > *threshold;
            let actual = *label > 0.5;
            match (predicted, actual) {
                (true, true) => tp += 1.0,
                (true, false) => fp += 1.0,
                (false, true) => fn_ += 1.0,
                (false, false) => {}
            }
            if predicted == actual {
                correct += 1.0;
            }
        }
        let f1 = if tp == 0.0 { 0.0 } else { 2.0 * tp / (2.0 * tp + fp + fn_) };

        Ok(FittedTrial {
            model: *threshold,
            metrics: BTreeMap::from([
                ("Accuracy".to_string(), correct / xs.len() as f64),
                ("F1-score".to_string(), f1),
            ]),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trueno_automl::logging::init("trueno_automl=info");

    let budget_seconds: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()
        .context("budget_seconds must be a whole number")?
        .unwrap_or(30);

    println!("=== Trueno-AutoML Sweep Demo ===\n");

    let dataset = Arc::new(synthetic_dataset(5_000)?);
    let candidates: Vec<_> = (1..20)
        .map(|step| {
            let threshold = f64::from(step) * 0.05;
            PipelineCandidate::new(format!("x > {threshold:.2}"), "ThresholdClassifier", threshold)
        })
        .collect();
    println!("Candidates: {}", candidates.len());
    println!("Time budget: {budget_seconds}s (Ctrl-C to stop early)\n");

    let config = ExperimentConfig::default();
    let splitter = config.row_splitter()?;
    let mut coordinator = ExperimentCoordinator::new(
        SweepEngine::new(ThresholdClassifier, candidates),
        splitter,
        config,
    )?
    .with_observer(LoggingObserver);

    let cancel = CancellationSource::new();
    let signal = cancel.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let task = TaskKind::BinaryClassification;
    let request = ExperimentRequest::new(dataset, "label", task.default_metric(), Budget::time(budget_seconds))
        .with_task(task)
        .with_dataset_name("synthetic");

    let report = coordinator.run(request, signal).await?;

    println!("{}", report.summary());
    match report.outcome() {
        ExperimentOutcome::Completed => println!("Experiment completed."),
        ExperimentOutcome::StoppedEarlyWithModel => println!("Time budget elapsed; best model so far kept."),
        ExperimentOutcome::CancelledWithPartialResults => println!("Cancelled; partial results above."),
    }
    if let Some(best) = report.best_trial() {
        println!(
            "Best pipeline: {} (Accuracy {:.4}, threshold {:?})",
            best.pipeline(),
            best.score().unwrap_or(f64::NAN),
            best.artifact()
        );
    }
    Ok(())
}
