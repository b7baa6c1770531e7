//! Interaction matrix assembly
//!
//! Every matrix of a run is built against the same user and item
//! [`IndexSet`]s so they can be combined element-wise later.

use nalgebra::DMatrix;
use tracing::debug;

use super::index::IndexSet;
use super::signals::{InteractionEvent, Reducer, SignalKind};

/// Dense users x items matrix for one signal kind
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    kind: SignalKind,
    values: DMatrix<f64>,
}

impl InteractionMatrix {
    pub fn zeros(kind: SignalKind, users: &IndexSet, items: &IndexSet) -> Self {
        Self {
            kind,
            values: DMatrix::zeros(users.len(), items.len()),
        }
    }

    /// Aggregate events of `kind` into a matrix over `users` x `items`
    ///
    /// Events of another kind or with ids outside the index sets are ignored.
    /// Pairs without events stay zero.
    pub fn build(
        events: &[InteractionEvent],
        kind: SignalKind,
        users: &IndexSet,
        items: &IndexSet,
    ) -> Self {
        let (rows, cols) = (users.len(), items.len());
        let mut totals = DMatrix::<f64>::zeros(rows, cols);
        let mut counts = DMatrix::<u32>::zeros(rows, cols);
        let mut skipped = 0usize;

        for event in events {
            if event.kind != kind {
                skipped += 1;
                continue;
            }
            let (Some(r), Some(c)) = (users.position(event.user_id), items.position(event.item_id))
            else {
                skipped += 1;
                continue;
            };

            counts[(r, c)] += 1;
            match kind.reducer() {
                Reducer::Sum | Reducer::Mean => totals[(r, c)] += event.magnitude,
                Reducer::Count => totals[(r, c)] += 1.0,
                Reducer::Any => {
                    if event.magnitude > 0.0 {
                        totals[(r, c)] = 1.0;
                    }
                }
            }
        }

        if kind.reducer() == Reducer::Mean {
            for (total, count) in totals.iter_mut().zip(counts.iter()) {
                if *count > 0 {
                    *total /= f64::from(*count);
                }
            }
        }

        if skipped > 0 {
            debug!("Skipped {} events while building {} matrix", skipped, kind);
        }

        Self {
            kind,
            values: totals,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user_id: i64, item_id: i64, kind: SignalKind, magnitude: f64) -> InteractionEvent {
        InteractionEvent {
            user_id,
            item_id,
            kind,
            magnitude,
            timestamp: None,
        }
    }

    #[test]
    fn test_play_time_sums() {
        let users = IndexSet::from_ids([1, 2]);
        let items = IndexSet::from_ids([10, 20, 30]);
        let events = vec![
            event(1, 10, SignalKind::PlayTime, 60.0),
            event(1, 10, SignalKind::PlayTime, 30.0),
            event(2, 30, SignalKind::PlayTime, 15.0),
        ];
        let m = InteractionMatrix::build(&events, SignalKind::PlayTime, &users, &items);
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.values()[(0, 0)], 90.0);
        assert_eq!(m.values()[(1, 2)], 15.0);
        assert_eq!(m.values()[(0, 1)], 0.0);
    }

    #[test]
    fn test_engagement_counts_occurrences() {
        let users = IndexSet::from_ids([1]);
        let items = IndexSet::from_ids([5]);
        let events = vec![
            event(1, 5, SignalKind::Engagement, 1.0),
            event(1, 5, SignalKind::Engagement, 1.0),
            event(1, 5, SignalKind::Engagement, 1.0),
        ];
        let m = InteractionMatrix::build(&events, SignalKind::Engagement, &users, &items);
        assert_eq!(m.values()[(0, 0)], 3.0);
    }

    #[test]
    fn test_completion_is_logical_or() {
        let users = IndexSet::from_ids([1, 2]);
        let items = IndexSet::from_ids([7]);
        let events = vec![
            event(1, 7, SignalKind::Completion, 0.0),
            event(1, 7, SignalKind::Completion, 1.0),
            event(1, 7, SignalKind::Completion, 0.0),
            event(2, 7, SignalKind::Completion, 0.0),
        ];
        let m = InteractionMatrix::build(&events, SignalKind::Completion, &users, &items);
        assert_eq!(m.values()[(0, 0)], 1.0);
        assert_eq!(m.values()[(1, 0)], 0.0);
    }

    #[test]
    fn test_rating_takes_mean() {
        let users = IndexSet::from_ids([1]);
        let items = IndexSet::from_ids([3]);
        let events = vec![
            event(1, 3, SignalKind::Rating, 4.0),
            event(1, 3, SignalKind::Rating, 5.0),
        ];
        let m = InteractionMatrix::build(&events, SignalKind::Rating, &users, &items);
        assert_eq!(m.values()[(0, 0)], 4.5);
    }

    #[test]
    fn test_no_events_gives_zero_matrix() {
        let users = IndexSet::from_ids([1, 2]);
        let items = IndexSet::from_ids([3]);
        let m = InteractionMatrix::build(&[], SignalKind::PlayTime, &users, &items);
        assert_eq!(m, InteractionMatrix::zeros(SignalKind::PlayTime, &users, &items));
    }

    #[test]
    fn test_foreign_events_ignored() {
        let users = IndexSet::from_ids([1]);
        let items = IndexSet::from_ids([3]);
        let events = vec![
            event(1, 3, SignalKind::Engagement, 1.0),
            event(9, 3, SignalKind::PlayTime, 10.0),
        ];
        let m = InteractionMatrix::build(&events, SignalKind::PlayTime, &users, &items);
        assert_eq!(m.values()[(0, 0)], 0.0);
    }
}
