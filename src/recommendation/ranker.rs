//! Top-K ranking over fused score matrices

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::index::IndexSet;

/// A ranked (user, item, score) triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: i64,
    pub item_id: i64,
    pub score: f64,
}

/// Column positions of the `k` highest scores, descending
///
/// Ties keep the lower position first; NaN ranks last.
pub fn top_k_positions(scores: &[f64], k: usize) -> Vec<usize> {
    let key = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
    let mut positions: Vec<usize> = (0..scores.len()).collect();
    positions.sort_by(|&a, &b| {
        key(scores[b])
            .partial_cmp(&key(scores[a]))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    positions.truncate(k);
    positions
}

/// Top-K items for the user at row `row`
pub fn rank_row(
    scores: &DMatrix<f64>,
    users: &IndexSet,
    items: &IndexSet,
    row: usize,
    k: usize,
) -> Vec<Recommendation> {
    let Some(user_id) = users.id_at(row) else {
        return Vec::new();
    };
    let row_scores: Vec<f64> = scores.row(row).iter().copied().collect();

    top_k_positions(&row_scores, k)
        .into_iter()
        .filter_map(|col| {
            Some(Recommendation {
                user_id,
                item_id: items.id_at(col)?,
                score: row_scores[col],
            })
        })
        .collect()
}

/// Top-K items for every user, grouped by user in index order
pub fn rank_all(
    scores: &DMatrix<f64>,
    users: &IndexSet,
    items: &IndexSet,
    k: usize,
) -> Vec<Recommendation> {
    (0..scores.nrows().min(users.len()))
        .flat_map(|row| rank_row(scores, users, items, row, k))
        .collect()
}

/// Top-K items for one user; empty when the user is not in the index
pub fn rank_user(
    scores: &DMatrix<f64>,
    users: &IndexSet,
    items: &IndexSet,
    user_id: i64,
    k: usize,
) -> Vec<Recommendation> {
    match users.position(user_id) {
        Some(row) if row < scores.nrows() => rank_row(scores, users, items, row, k),
        _ => Vec::new(),
    }
}
