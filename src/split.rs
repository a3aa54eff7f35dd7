//! Validation strategy planning and fold construction
//!
//! Small datasets get k-fold cross-validation (a more reliable estimate at k×
//! the training cost); large ones get a single held-out split. The decision is
//! made once per experiment by [`SplitPlanner::plan`], which is pure. Building
//! the physical folds is delegated to a [`SplitExecutor`].

use crate::dataset::{Dataset, TableDataset};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Row count below which cross-validation is used
pub const DEFAULT_CROSS_VALIDATION_ROW_THRESHOLD: usize = 15_000;

/// Number of cross-validation folds
pub const DEFAULT_CROSS_VALIDATION_FOLDS: usize = 10;

/// Fraction of rows held out for validation by [`RowSplitter`]
pub const DEFAULT_HOLDOUT_VALIDATION_FRACTION: f64 = 0.1;

/// Validation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// k-fold cross-validation
    CrossValidation {
        /// Number of folds
        folds: usize,
    },
    /// Single train/validation split
    HoldOut,
}

/// Validation strategy chosen for one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    strategy: SplitStrategy,
    row_count: usize,
    user_validation: bool,
}

impl SplitPlan {
    /// Chosen strategy.
    #[must_use]
    pub const fn strategy(&self) -> SplitStrategy {
        self.strategy
    }

    /// Fold count, present iff cross-validation was chosen.
    #[must_use]
    pub const fn fold_count(&self) -> Option<usize> {
        match self.strategy {
            SplitStrategy::CrossValidation { folds } => Some(folds),
            SplitStrategy::HoldOut => None,
        }
    }

    /// `true` for cross-validation plans.
    #[must_use]
    pub const fn is_cross_validation(&self) -> bool {
        matches!(self.strategy, SplitStrategy::CrossValidation { .. })
    }

    /// Row count the plan was computed from.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// `true` when the caller supplied the validation dataset.
    #[must_use]
    pub const fn uses_supplied_validation(&self) -> bool {
        self.user_validation
    }

    /// Number of train/validation pairs this plan produces.
    #[must_use]
    pub const fn expected_folds(&self) -> usize {
        match self.strategy {
            SplitStrategy::CrossValidation { folds } => folds,
            SplitStrategy::HoldOut => 1,
        }
    }
}

/// Chooses cross-validation or hold-out from the dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlanner {
    row_threshold: usize,
    folds: usize,
}

impl Default for SplitPlanner {
    fn default() -> Self {
        Self::new(
            DEFAULT_CROSS_VALIDATION_ROW_THRESHOLD,
            DEFAULT_CROSS_VALIDATION_FOLDS,
        )
    }
}

impl SplitPlanner {
    /// Create a planner with a custom threshold and fold count.
    #[must_use]
    pub const fn new(row_threshold: usize, folds: usize) -> Self {
        Self {
            row_threshold,
            folds,
        }
    }

    /// Plan the split for a dataset of `row_count` rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty dataset
    pub fn plan(&self, row_count: usize) -> Result<SplitPlan> {
        self.plan_with_validation(row_count, false)
    }

    /// Plan the split, honouring a caller-supplied validation dataset.
    ///
    /// A supplied validation dataset always means hold-out: the caller has
    /// already decided which rows validate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty dataset
    pub fn plan_with_validation(&self, row_count: usize, has_validation: bool) -> Result<SplitPlan> {
        if row_count == 0 {
            return Err(Error::InvalidInput(
                "dataset is empty (0 rows); nothing to train on".to_string(),
            ));
        }

        let strategy = if !has_validation && row_count < self.row_threshold {
            SplitStrategy::CrossValidation { folds: self.folds }
        } else {
            SplitStrategy::HoldOut
        };

        Ok(SplitPlan {
            strategy,
            row_count,
            user_validation: has_validation,
        })
    }
}

/// One train/validation pair.
#[derive(Debug, Clone)]
pub struct Fold<D> {
    /// Rows to fit on
    pub train: D,
    /// Rows to score on
    pub validation: D,
}

/// Concrete folds produced for a [`SplitPlan`].
#[derive(Debug, Clone)]
pub struct DatasetSplit<D> {
    plan: SplitPlan,
    folds: Vec<Fold<D>>,
}

impl<D> DatasetSplit<D> {
    /// Pair a plan with its folds.
    ///
    /// # Errors
    ///
    /// Returns `Split` if the fold count doesn't match the plan
    pub fn new(plan: SplitPlan, folds: Vec<Fold<D>>) -> Result<Self> {
        if folds.len() != plan.expected_folds() {
            return Err(Error::Split(format!(
                "plan {:?} expects {} folds, executor produced {}",
                plan.strategy(),
                plan.expected_folds(),
                folds.len()
            )));
        }
        Ok(Self { plan, folds })
    }

    /// Plan the folds were built for.
    #[must_use]
    pub const fn plan(&self) -> &SplitPlan {
        &self.plan
    }

    /// Train/validation pairs.
    #[must_use]
    pub fn folds(&self) -> &[Fold<D>] {
        &self.folds
    }
}

/// Builds train/validation datasets for a plan.
pub trait SplitExecutor<D>: Send + Sync {
    /// Build the folds for `plan` over `dataset`.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset cannot be partitioned as planned
    fn execute(&self, dataset: &D, plan: &SplitPlan) -> Result<DatasetSplit<D>>;
}

/// Contiguous row-range splitter for [`TableDataset`].
///
/// Hold-out validates on the trailing rows; cross-validation uses k contiguous
/// validation ranges. Shuffling, if wanted, belongs before the experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowSplitter {
    validation_fraction: f64,
}

impl Default for RowSplitter {
    fn default() -> Self {
        Self {
            validation_fraction: DEFAULT_HOLDOUT_VALIDATION_FRACTION,
        }
    }
}

impl RowSplitter {
    /// Create a splitter holding out `validation_fraction` of the rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless `0 < validation_fraction < 1`
    pub fn new(validation_fraction: f64) -> Result<Self> {
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(Error::InvalidInput(format!(
                "validation fraction must be in (0, 1), got {validation_fraction}"
            )));
        }
        Ok(Self {
            validation_fraction,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn holdout(&self, dataset: &TableDataset) -> Result<Vec<Fold<TableDataset>>> {
        let rows = dataset.row_count();
        if rows < 2 {
            return Err(Error::Split(format!(
                "hold-out needs at least 2 rows, dataset has {rows}"
            )));
        }
        let validation_rows = ((rows as f64 * self.validation_fraction).ceil() as usize)
            .clamp(1, rows - 1);
        let train_rows = rows - validation_rows;

        Ok(vec![Fold {
            train: dataset.slice(0, train_rows)?,
            validation: dataset.slice(train_rows, validation_rows)?,
        }])
    }

    fn cross_validation(dataset: &TableDataset, folds: usize) -> Result<Vec<Fold<TableDataset>>> {
        let rows = dataset.row_count();
        if folds < 2 || rows < folds {
            return Err(Error::Split(format!(
                "cannot build {folds} cross-validation folds from {rows} rows"
            )));
        }

        (0..folds)
            .map(|fold| {
                let start = fold * rows / folds;
                let end = (fold + 1) * rows / folds;
                let validation = dataset.slice(start, end - start)?;
                let train = TableDataset::concat(&[
                    dataset.slice(0, start)?,
                    dataset.slice(end, rows - end)?,
                ])?;
                Ok(Fold { train, validation })
            })
            .collect()
    }
}

impl SplitExecutor<TableDataset> for RowSplitter {
    fn execute(&self, dataset: &TableDataset, plan: &SplitPlan) -> Result<DatasetSplit<TableDataset>> {
        let folds = match plan.strategy() {
            SplitStrategy::HoldOut => self.holdout(dataset)?,
            SplitStrategy::CrossValidation { folds } => Self::cross_validation(dataset, folds)?,
        };
        DatasetSplit::new(*plan, folds)
    }
}
