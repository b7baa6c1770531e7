//! Weighted fusion of reconstructed signal matrices

use nalgebra::DMatrix;
use tracing::warn;

use crate::error::{Error, Result};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Fixed weighted sum over signal matrices
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFuser {
    weights: Vec<f64>,
}

impl SignalFuser {
    /// Weights must be nonnegative and sum to 1
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::InvalidWeights {
                message: "at least one weight is required".into(),
            });
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(Error::InvalidWeights {
                message: format!("weight {} is not a nonnegative number", w).into(),
            });
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(Error::InvalidWeights {
                message: format!("weights sum to {}, expected 1", total).into(),
            });
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weighted element-wise sum over `shape`
    ///
    /// An absent matrix, or one whose shape differs from `shape`, contributes
    /// zeros.
    pub fn fuse(
        &self,
        shape: (usize, usize),
        matrices: &[Option<DMatrix<f64>>],
    ) -> Result<DMatrix<f64>> {
        if matrices.len() != self.weights.len() {
            return Err(Error::InvalidWeights {
                message: format!(
                    "{} weights for {} matrices",
                    self.weights.len(),
                    matrices.len()
                )
                .into(),
            });
        }

        let mut fused = DMatrix::zeros(shape.0, shape.1);
        for (i, (weight, matrix)) in self.weights.iter().zip(matrices).enumerate() {
            match matrix {
                Some(m) if m.shape() == shape => fused += m * *weight,
                Some(m) => warn!(
                    "Signal {} has shape {:?}, expected {:?}; substituting zeros",
                    i,
                    m.shape(),
                    shape
                ),
                None => {}
            }
        }
        Ok(fused)
    }
}
