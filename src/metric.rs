//! Optimizing metrics and their ordering
//!
//! Every place that picks a "best" trial goes through [`MetricOrdering`], built
//! once per experiment from the declared [`MetricDirection`] of the optimizing
//! metric.
//!
//! NaN policy: a NaN score is worse than any real number in both directions,
//! so a failed metric computation can never be selected as best.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Whether higher or lower metric values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricDirection {
    /// Higher is better (accuracy, AUC, R²)
    Maximize,
    /// Lower is better (losses, errors)
    Minimize,
}

impl MetricDirection {
    /// Declared direction for a well-known metric name.
    ///
    /// Names are matched case-insensitively, ignoring `-`, `_` and spaces.
    /// Returns `None` for metrics this crate does not know; callers must then
    /// state the direction explicitly.
    #[must_use]
    pub fn for_metric(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "accuracy" | "microaccuracy" | "macroaccuracy" | "auc" | "areaunderroccurve"
            | "auprc" | "areaunderprecisionrecallcurve" | "f1" | "f1score" | "precision"
            | "positiveprecision" | "recall" | "positiverecall" | "rsquared" | "r2"
            | "topkaccuracy" => Some(Self::Maximize),
            "logloss" | "absoluteloss" | "meanabsoluteerror" | "mae"
            | "squaredloss" | "meansquarederror" | "mse" | "rmsloss"
            | "rootmeansquarederror" | "rmse" => Some(Self::Minimize),
            _ => None,
        }
    }

    /// `true` for [`MetricDirection::Maximize`].
    #[must_use]
    pub const fn is_maximizing(self) -> bool {
        matches!(self, Self::Maximize)
    }
}

/// Comparison of metric scores under a fixed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricOrdering {
    direction: MetricDirection,
}

impl MetricOrdering {
    /// Create an ordering for the given direction.
    #[must_use]
    pub const fn new(direction: MetricDirection) -> Self {
        Self { direction }
    }

    /// Ordering where higher scores are better.
    #[must_use]
    pub const fn maximizing() -> Self {
        Self::new(MetricDirection::Maximize)
    }

    /// Ordering where lower scores are better.
    #[must_use]
    pub const fn minimizing() -> Self {
        Self::new(MetricDirection::Minimize)
    }

    /// Active direction.
    #[must_use]
    pub const fn direction(self) -> MetricDirection {
        self.direction
    }

    /// `true` when higher scores are better.
    #[must_use]
    pub const fn is_maximizing(self) -> bool {
        self.direction.is_maximizing()
    }

    /// Numeric comparison of `a` and `b`.
    ///
    /// NaN compares as the worst possible value for the active direction:
    /// below every real number when maximizing, above every real number when
    /// minimizing. Two NaNs compare equal.
    #[must_use]
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => self.worst(),
            (false, true) => self.worst().reverse(),
            (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    }

    /// `true` when `a` is strictly better than `b`.
    #[must_use]
    pub fn is_better(self, a: f64, b: f64) -> bool {
        self.compare(a, b) == self.better()
    }

    /// Quality ranking: `Greater` when `a` is better than `b`.
    ///
    /// Sorting with `rank(b, a)` puts the best score first.
    #[must_use]
    pub fn rank(self, a: f64, b: f64) -> Ordering {
        let ordering = self.compare(a, b);
        if self.is_maximizing() {
            ordering
        } else {
            ordering.reverse()
        }
    }

    const fn better(self) -> Ordering {
        if self.is_maximizing() {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    const fn worst(self) -> Ordering {
        if self.is_maximizing() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

impl From<MetricDirection> for MetricOrdering {
    fn from(direction: MetricDirection) -> Self {
        Self::new(direction)
    }
}

/// The single metric used to rank trials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizingMetric {
    name: String,
    direction: MetricDirection,
}

impl OptimizingMetric {
    /// Create an optimizing metric with an explicit direction.
    #[must_use]
    pub fn new(name: impl Into<String>, direction: MetricDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    /// Create an optimizing metric whose direction is looked up by name.
    ///
    /// Returns `None` for metric names without a declared direction.
    #[must_use]
    pub fn known(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        MetricDirection::for_metric(&name).map(|direction| Self { name, direction })
    }

    /// Metric name, as reported in trial metric maps.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared direction.
    #[must_use]
    pub const fn direction(&self) -> MetricDirection {
        self.direction
    }

    /// Ordering to rank trials by this metric.
    #[must_use]
    pub const fn ordering(&self) -> MetricOrdering {
        MetricOrdering::new(self.direction)
    }
}

/// Machine learning task of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Two-class classification
    BinaryClassification,
    /// Many-class classification
    MulticlassClassification,
    /// Numeric prediction
    Regression,
    /// User/item rating prediction
    Recommendation,
}

impl TaskKind {
    /// Metric optimized when the caller does not choose one.
    #[must_use]
    pub fn default_metric(self) -> OptimizingMetric {
        match self {
            Self::BinaryClassification => {
                OptimizingMetric::new("Accuracy", MetricDirection::Maximize)
            }
            Self::MulticlassClassification => {
                OptimizingMetric::new("MicroAccuracy", MetricDirection::Maximize)
            }
            Self::Regression | Self::Recommendation => {
                OptimizingMetric::new("RSquared", MetricDirection::Maximize)
            }
        }
    }

    /// Metric columns shown in the results table, in display order.
    #[must_use]
    pub const fn reported_metrics(self) -> &'static [&'static str] {
        match self {
            Self::BinaryClassification => &["Accuracy", "AUC", "AUPRC", "F1-score"],
            Self::MulticlassClassification => &["MicroAccuracy", "MacroAccuracy"],
            Self::Regression | Self::Recommendation => {
                &["RSquared", "Absolute-loss", "Squared-loss", "RMS-loss"]
            }
        }
    }

    /// Human-readable task name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::BinaryClassification => "binary-classification",
            Self::MulticlassClassification => "multiclass-classification",
            Self::Regression => "regression",
            Self::Recommendation => "recommendation",
        }
    }
}
