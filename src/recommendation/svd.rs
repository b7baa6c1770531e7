//! Low-rank reconstruction via truncated SVD
//!
//! Reconstruction is best-effort denoising: any decomposition failure is
//! logged and replaced with an all-zero matrix of the input's shape.

use nalgebra::DMatrix;
use tracing::warn;

use crate::error::{Error, Result};

/// Default target rank
pub const DEFAULT_RANK: usize = 2;

const SVD_EPSILON: f64 = 1e-12;
const SVD_MAX_ITERATIONS: usize = 10_000;

/// Effective rank for a `rows x cols` matrix: `k` clamped to `[1, min(rows, cols) - 1]`
///
/// `None` when the matrix is too small to factorize.
pub fn effective_rank(rows: usize, cols: usize, rank: usize) -> Option<usize> {
    let min_dim = rows.min(cols);
    if min_dim <= 1 {
        return None;
    }
    Some(rank.clamp(1, min_dim - 1))
}

/// Rank-`k` approximation of `matrix`, or zeros when it cannot be computed
pub fn reconstruct(matrix: &DMatrix<f64>, rank: usize) -> DMatrix<f64> {
    match try_reconstruct(matrix, rank) {
        Ok(reconstructed) => reconstructed,
        Err(e) => {
            warn!(
                "SVD reconstruction of {}x{} matrix failed, using zeros: {}",
                matrix.nrows(),
                matrix.ncols(),
                e
            );
            metrics::counter!("playfeed_svd_fallbacks_total").increment(1);
            DMatrix::zeros(matrix.nrows(), matrix.ncols())
        }
    }
}

/// Rank-`k` approximation `U * diag(S) * V^T` over the top singular triplets
///
/// Empty and degenerate (`min(rows, cols) <= 1`) matrices reconstruct to zeros.
pub fn try_reconstruct(matrix: &DMatrix<f64>, rank: usize) -> Result<DMatrix<f64>> {
    let (rows, cols) = matrix.shape();
    let Some(k) = effective_rank(rows, cols, rank) else {
        return Ok(DMatrix::zeros(rows, cols));
    };

    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::decomposition("matrix contains non-finite values"));
    }

    let svd = matrix
        .clone()
        .try_svd(true, true, SVD_EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| Error::decomposition("SVD did not converge"))?;
    let u = svd
        .u
        .ok_or_else(|| Error::decomposition("SVD failed to compute U"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| Error::decomposition("SVD failed to compute V^T"))?;
    let sigma = svd.singular_values;

    // Singular values are not guaranteed to come back ordered
    let mut order: Vec<usize> = (0..sigma.len()).collect();
    order.sort_by(|&a, &b| {
        sigma[b]
            .partial_cmp(&sigma[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut reconstructed = DMatrix::zeros(rows, cols);
    for &i in order.iter().take(k) {
        let rank_one = (u.column(i) * v_t.row(i)) * sigma[i];
        reconstructed += rank_one;
    }

    if reconstructed.iter().any(|v| !v.is_finite()) {
        return Err(Error::decomposition("reconstruction produced non-finite values"));
    }

    Ok(reconstructed)
}
