//! Experiment configuration
//!
//! Tunables with sensible defaults, loadable from JSON. Every field is
//! optional in the JSON document; missing fields take their default.
//!
//! # Example
//!
//! ```rust
//! use trueno_automl::config::ExperimentConfig;
//!
//! let config = ExperimentConfig::from_json_str(r#"{ "top_n": 3 }"#).unwrap();
//! assert_eq!(config.top_n, 3);
//! assert_eq!(config.cross_validation_folds, 10);
//! ```

use crate::engine::DEFAULT_CHANNEL_CAPACITY;
use crate::experiment::DEFAULT_TOP_N;
use crate::split::{
    RowSplitter, SplitPlanner, DEFAULT_CROSS_VALIDATION_FOLDS, DEFAULT_CROSS_VALIDATION_ROW_THRESHOLD,
    DEFAULT_HOLDOUT_VALIDATION_FRACTION,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default time the engine gets to wind down after a stop request
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;

/// Coordinator tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Size of the top-N trial list
    pub top_n: usize,
    /// Row count below which cross-validation is used
    pub cross_validation_row_threshold: usize,
    /// Number of cross-validation folds
    pub cross_validation_folds: usize,
    /// Fraction of rows held out when the split executor builds a hold-out
    pub holdout_validation_fraction: f64,
    /// How long to keep draining trials after asking the engine to stop
    pub grace_period_ms: u64,
    /// Finished trials buffered between engine and coordinator
    pub channel_capacity: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            cross_validation_row_threshold: DEFAULT_CROSS_VALIDATION_ROW_THRESHOLD,
            cross_validation_folds: DEFAULT_CROSS_VALIDATION_FOLDS,
            holdout_validation_fraction: DEFAULT_HOLDOUT_VALIDATION_FRACTION,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ExperimentConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> ExperimentConfigBuilder {
        ExperimentConfigBuilder::default()
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed JSON, `InvalidInput` for out-of-range values
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file can't be read, otherwise as [`Self::from_json_str`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading experiment config");
        Self::from_json_str(&json)
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(invalid("top_n must be at least 1"));
        }
        if self.cross_validation_folds < 2 {
            return Err(invalid("cross_validation_folds must be at least 2"));
        }
        if !(self.holdout_validation_fraction > 0.0 && self.holdout_validation_fraction < 1.0) {
            return Err(invalid(format!(
                "holdout_validation_fraction must be in (0, 1), got {}",
                self.holdout_validation_fraction
            )));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Planner using the configured threshold and fold count.
    #[must_use]
    pub const fn split_planner(&self) -> SplitPlanner {
        SplitPlanner::new(
            self.cross_validation_row_threshold,
            self.cross_validation_folds,
        )
    }

    /// Row splitter holding out the configured fraction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the fraction is outside (0, 1)
    pub fn row_splitter(&self) -> Result<RowSplitter> {
        RowSplitter::new(self.holdout_validation_fraction)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidInput(message.into())
}

/// Builder for [`ExperimentConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExperimentConfigBuilder {
    config: ExperimentConfig,
}

impl ExperimentConfigBuilder {
    /// Set the top-N list size.
    #[must_use]
    pub const fn top_n(mut self, top_n: usize) -> Self {
        self.config.top_n = top_n;
        self
    }

    /// Set the cross-validation row threshold.
    #[must_use]
    pub const fn cross_validation_row_threshold(mut self, rows: usize) -> Self {
        self.config.cross_validation_row_threshold = rows;
        self
    }

    /// Set the cross-validation fold count.
    #[must_use]
    pub const fn cross_validation_folds(mut self, folds: usize) -> Self {
        self.config.cross_validation_folds = folds;
        self
    }

    /// Set the hold-out validation fraction.
    #[must_use]
    pub const fn holdout_validation_fraction(mut self, fraction: f64) -> Self {
        self.config.holdout_validation_fraction = fraction;
        self
    }

    /// Set the stop grace period.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period_ms = grace.as_millis() as u64;
        self
    }

    /// Set the trial channel capacity.
    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for out-of-range values
    pub fn build(self) -> Result<ExperimentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Time and trial limits for one experiment.
///
/// Both limits are optional; with neither the experiment runs until the
/// engine is exhausted or the user cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Budget {
    max_time: Option<Duration>,
    max_trials: Option<usize>,
}

impl Budget {
    /// Limit wall-clock time to `seconds`.
    #[must_use]
    pub const fn time(seconds: u64) -> Self {
        Self {
            max_time: Some(Duration::from_secs(seconds)),
            max_trials: None,
        }
    }

    /// Limit the number of recorded trials.
    #[must_use]
    pub const fn trials(max_trials: usize) -> Self {
        Self {
            max_time: None,
            max_trials: Some(max_trials),
        }
    }

    /// No limits.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_time: None,
            max_trials: None,
        }
    }

    /// Add (or replace) the time limit.
    #[must_use]
    pub const fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Add (or replace) the trial limit.
    #[must_use]
    pub const fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = Some(max_trials);
        self
    }

    /// Time limit, if any.
    #[must_use]
    pub const fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    /// Trial limit, if any.
    #[must_use]
    pub const fn max_trials(&self) -> Option<usize> {
        self.max_trials
    }

    /// Time limit in seconds, `0.0` if unlimited.
    #[must_use]
    pub fn max_time_seconds(&self) -> f64 {
        self.max_time.map_or(0.0, |time| time.as_secs_f64())
    }

    /// Check that set limits are positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero time or trial limit
    pub fn validate(&self) -> Result<()> {
        if self.max_time.is_some_and(|time| time.is_zero()) {
            return Err(invalid("time budget must be positive"));
        }
        if self.max_trials == Some(0) {
            return Err(invalid("trial budget must be at least 1"));
        }
        Ok(())
    }
}
