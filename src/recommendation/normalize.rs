//! Row-wise max normalization

use nalgebra::DMatrix;

/// Divide every row by its maximum so values land in [0, 1]
///
/// Rows whose maximum is not positive are left untouched.
pub fn normalize_rows(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut normalized = matrix.clone();
    for mut row in normalized.row_iter_mut() {
        let row_max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if row_max > 0.0 {
            row /= row_max;
        }
    }
    normalized
}
