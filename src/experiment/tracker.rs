//! Best-trial tracking
//!
//! Keeps the best successful trial and a bounded top-N list under the active
//! [`MetricOrdering`]. N is small (default 5), so the list is a sorted `Vec`
//! with linear insertion: O(N) per trial.
//!
//! A NaN score is never ranked: the trial stays in the experiment's trial
//! list but cannot become best or enter the top-N list.
//!
//! Ties: earlier trials rank ahead of later ones with the same score, so on
//! overflow the latest of the tied worst trials is evicted.

use super::trial::TrialRun;
use crate::metric::MetricOrdering;
use crate::{Error, Result};
use std::cmp::Ordering;

/// Default size of the top-N list
pub const DEFAULT_TOP_N: usize = 5;

/// Effect of one observed trial on the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The trial is the new best (and leads the top-N list).
    NewBest,
    /// The trial entered the top-N list without becoming best.
    Ranked,
    /// The trial succeeded but ranks below the top-N list.
    Unranked,
    /// The trial failed or scored NaN and was not considered.
    Skipped,
}

impl Observation {
    /// `true` for [`Observation::NewBest`].
    #[must_use]
    pub const fn is_new_best(self) -> bool {
        matches!(self, Self::NewBest)
    }
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone)]
pub struct BestTrialState<A> {
    /// Best successful trial so far
    pub best: Option<TrialRun<A>>,
    /// Up to N best successful trials, best first
    pub top: Vec<TrialRun<A>>,
}

#[derive(Debug)]
struct Ranked<A> {
    seq: u64,
    score: f64,
    trial: TrialRun<A>,
}

/// Tracks the best trial and the top-N trials of an experiment.
///
/// Mutation goes through `&mut self`, so `best` and the top-N list are always
/// updated together by a single writer.
#[derive(Debug)]
pub struct BestTrialTracker<A> {
    ordering: MetricOrdering,
    capacity: usize,
    best: Option<Ranked<A>>,
    top: Vec<Ranked<A>>,
    seen: u64,
}

impl<A> BestTrialTracker<A> {
    /// Create a tracker keeping the `capacity` best trials.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `capacity` is zero
    pub fn new(ordering: MetricOrdering, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidInput(
                "top-N size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            ordering,
            capacity,
            best: None,
            top: Vec::with_capacity(capacity + 1),
            seen: 0,
        })
    }

    /// Ordering used to rank trials.
    #[must_use]
    pub const fn ordering(&self) -> MetricOrdering {
        self.ordering
    }

    /// Maximum size of the top-N list.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Successful trials with a real score observed so far.
    #[must_use]
    pub const fn successful_trials(&self) -> u64 {
        self.seen
    }

    /// Best trial so far.
    #[must_use]
    pub fn best(&self) -> Option<&TrialRun<A>> {
        self.best.as_ref().map(|ranked| &ranked.trial)
    }

    /// Score of the best trial so far.
    #[must_use]
    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|ranked| ranked.score)
    }

    /// Top-N trials, best first.
    pub fn top(&self) -> impl Iterator<Item = &TrialRun<A>> {
        self.top.iter().map(|ranked| &ranked.trial)
    }

    /// Feed one completed trial.
    pub fn observe(&mut self, trial: &TrialRun<A>) -> Observation {
        let score = match (trial.failure(), trial.score()) {
            (None, Some(score)) if !score.is_nan() => score,
            _ => return Observation::Skipped,
        };
        let seq = self.seen;
        self.seen += 1;

        let new_best = self
            .best
            .as_ref()
            .map_or(true, |best| self.ordering.is_better(score, best.score));
        if new_best {
            self.best = Some(Ranked {
                seq,
                score,
                trial: trial.clone(),
            });
        }

        // First slot holding a strictly worse trial; ties stay behind earlier ones.
        let position = self
            .top
            .iter()
            .position(|ranked| self.ordering.rank(score, ranked.score) == Ordering::Greater)
            .unwrap_or(self.top.len());

        if position >= self.capacity {
            return Observation::Unranked;
        }

        self.top.insert(
            position,
            Ranked {
                seq,
                score,
                trial: trial.clone(),
            },
        );
        if self.top.len() > self.capacity {
            if let Some(evicted) = self.top.pop() {
                tracing::trace!(
                    trial = evicted.trial.index(),
                    seq = evicted.seq,
                    "evicted from top-N"
                );
            }
        }

        if new_best {
            Observation::NewBest
        } else {
            Observation::Ranked
        }
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> BestTrialState<A> {
        BestTrialState {
            best: self.best().cloned(),
            top: self.top().cloned().collect(),
        }
    }

    /// Consume the tracker, handing out its state.
    #[must_use]
    pub fn into_state(self) -> BestTrialState<A> {
        BestTrialState {
            best: self.best.map(|ranked| ranked.trial),
            top: self.top.into_iter().map(|ranked| ranked.trial).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::trial::TrialFailure;
    use std::collections::BTreeMap;

    fn success(index: usize, score: f64) -> TrialRun<usize> {
        let metrics = BTreeMap::from([("Accuracy".to_string(), score)]);
        TrialRun::success(format!("pipeline-{index}"), "FastTree", metrics, score, 1.0, index)
            .with_index(index)
    }

    fn failure(index: usize) -> TrialRun<usize> {
        TrialRun::failed("broken", "LightGbm", 0.5, TrialFailure::new("out of memory"))
            .with_index(index)
    }

    fn top_scores(tracker: &BestTrialTracker<usize>) -> Vec<f64> {
        tracker.top().filter_map(TrialRun::score).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BestTrialTracker::<()>::new(MetricOrdering::maximizing(), 0).is_err());
    }

    #[test]
    fn test_best_never_regresses() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 3).unwrap();

        assert_eq!(tracker.observe(&success(0, 0.5)), Observation::NewBest);
        assert_eq!(tracker.observe(&success(1, 0.9)), Observation::NewBest);
        assert_eq!(tracker.observe(&success(2, 0.7)), Observation::Ranked);
        assert_eq!(tracker.best_score(), Some(0.9));
        assert_eq!(tracker.best().map(TrialRun::index), Some(1));
    }

    #[test]
    fn test_minimizing_best() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::minimizing(), 3).unwrap();
        tracker.observe(&success(0, 0.5));
        tracker.observe(&success(1, 0.2));
        tracker.observe(&success(2, 0.3));
        assert_eq!(tracker.best_score(), Some(0.2));
        assert_eq!(top_scores(&tracker), vec![0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_failures_are_skipped() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 3).unwrap();
        assert_eq!(tracker.observe(&failure(0)), Observation::Skipped);
        assert!(tracker.best().is_none());
        assert_eq!(tracker.top().count(), 0);
        assert_eq!(tracker.successful_trials(), 0);
    }

    #[test]
    fn test_top_n_bounded_and_sorted() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 3).unwrap();
        for (index, score) in [0.4, 0.1, 0.8, 0.3, 0.9, 0.2].into_iter().enumerate() {
            tracker.observe(&success(index, score));
        }
        assert_eq!(top_scores(&tracker), vec![0.9, 0.8, 0.4]);
        assert_eq!(tracker.observe(&success(6, 0.05)), Observation::Unranked);
    }

    #[test]
    fn test_ties_keep_earliest() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 2).unwrap();
        tracker.observe(&success(0, 0.5));
        tracker.observe(&success(1, 0.5));
        tracker.observe(&success(2, 0.5));

        let indices: Vec<usize> = tracker.top().map(TrialRun::index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(tracker.best().map(TrialRun::index), Some(0));
    }

    #[test]
    fn test_nan_score_never_ranked() {
        for ordering in [MetricOrdering::maximizing(), MetricOrdering::minimizing()] {
            let mut tracker = BestTrialTracker::new(ordering, 2).unwrap();
            assert_eq!(tracker.observe(&success(0, f64::NAN)), Observation::Skipped);
            assert!(tracker.best().is_none());
            assert_eq!(tracker.top().count(), 0);
            assert_eq!(tracker.successful_trials(), 0);
        }
    }

    #[test]
    fn test_nan_score_replaced_by_real_score() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 2).unwrap();
        tracker.observe(&success(0, f64::NAN));
        assert_eq!(tracker.observe(&success(1, -5.0)), Observation::NewBest);
        assert_eq!(tracker.best().map(TrialRun::index), Some(1));
        assert_eq!(tracker.top().next().map(TrialRun::index), Some(1));
    }

    #[test]
    fn test_snapshot_matches_state() {
        let mut tracker = BestTrialTracker::new(MetricOrdering::maximizing(), 2).unwrap();
        tracker.observe(&success(0, 0.3));
        tracker.observe(&success(1, 0.6));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.best.as_ref().map(TrialRun::index), Some(1));
        assert_eq!(snapshot.top.len(), 2);

        let state = tracker.into_state();
        assert_eq!(state.best.and_then(|t| t.artifact().copied()), Some(1));
    }
}
