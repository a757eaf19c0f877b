//! Residual blocks of the factor graph.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::variable::VariableType;
use crate::losses::RobustLoss;

#[derive(Debug, Error)]
pub enum FactorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Jacobian computation failed: {0}")]
    JacobianFailed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type FactorResult<T> = Result<T, FactorError>;

/// Residual of a factor and, on request, its Jacobian.
///
/// The Jacobian has one row per residual and one column per tangent
/// coordinate of the connected variables, in connection order.
#[derive(Debug, Clone)]
pub struct LinearizationResult {
    pub residual: DVector<f64>,
    pub jacobian: Option<DMatrix<f64>>,
}

impl LinearizationResult {
    pub fn residual_only(residual: Vec<f64>) -> Self {
        Self {
            residual: DVector::from_vec(residual),
            jacobian: None,
        }
    }

    pub fn with_jacobian(residual: Vec<f64>, jacobian: DMatrix<f64>) -> Self {
        Self {
            residual: DVector::from_vec(residual),
            jacobian: Some(jacobian),
        }
    }

    /// `|r|^2` before any robust loss.
    pub fn squared_norm(&self) -> f64 {
        self.residual.norm_squared()
    }
}

/// A measurement connecting one or more variables.
///
/// Factors whose residual is awkward to differentiate by hand build their
/// Jacobian with [`numeric_linearize`].
pub trait Factor: Send + Sync {
    /// Residual (and Jacobian when `compute_jacobian`) at `params`, one global
    /// parameter block per connected variable.
    fn linearize(&self, params: &[&[f64]], compute_jacobian: bool)
        -> FactorResult<LinearizationResult>;

    fn residual_dim(&self) -> usize;

    fn num_variables(&self) -> usize;

    /// Tangent dimension of the `idx`-th connected variable.
    fn variable_local_dim(&self, idx: usize) -> usize;

    fn total_local_dim(&self) -> usize {
        (0..self.num_variables())
            .map(|i| self.variable_local_dim(i))
            .sum()
    }

    /// Robust loss applied to `|r|^2`, if any.
    fn get_loss(&self) -> Option<&dyn RobustLoss> {
        None
    }
}

/// Central-difference Jacobian of `residual_fn` on the tangent space of each
/// connected variable.
///
/// Euclidean coordinates step relative to their magnitude, SE(3) coordinates
/// by a fixed amount.
pub fn numeric_linearize<F>(
    var_types: &[VariableType],
    params: &[&[f64]],
    compute_jacobian: bool,
    residual_fn: F,
) -> FactorResult<LinearizationResult>
where
    F: Fn(&[&[f64]]) -> FactorResult<Vec<f64>>,
{
    const STEP: f64 = 1e-6;

    if var_types.len() != params.len() {
        return Err(FactorError::DimensionMismatch {
            expected: var_types.len(),
            actual: params.len(),
        });
    }
    if let Some((t, p)) = var_types
        .iter()
        .zip(params)
        .find(|(t, p)| p.len() != t.global_dim())
    {
        return Err(FactorError::DimensionMismatch {
            expected: t.global_dim(),
            actual: p.len(),
        });
    }

    let residual = residual_fn(params)?;
    if !compute_jacobian {
        return Ok(LinearizationResult::residual_only(residual));
    }

    let cols: usize = var_types.iter().map(|t| t.local_dim()).sum();
    let mut jacobian = DMatrix::zeros(residual.len(), cols);
    let mut shifted: Vec<Vec<f64>> = params.iter().map(|p| p.to_vec()).collect();

    // evaluate with variable `idx` moved by `delta`, the others untouched
    let mut eval = |idx: usize, delta: &[f64]| -> FactorResult<DVector<f64>> {
        shifted[idx] = var_types[idx]
            .retract(params[idx], delta)
            .map_err(|e| FactorError::JacobianFailed(e.to_string()))?;
        let views: Vec<&[f64]> = shifted.iter().map(Vec::as_slice).collect();
        let r = residual_fn(&views)?;
        shifted[idx].copy_from_slice(params[idx]);
        if r.len() != residual.len() {
            return Err(FactorError::DimensionMismatch {
                expected: residual.len(),
                actual: r.len(),
            });
        }
        Ok(DVector::from_vec(r))
    };

    let mut col = 0;
    for (idx, var_type) in var_types.iter().enumerate() {
        let mut delta = vec![0.0; var_type.local_dim()];
        for d in 0..delta.len() {
            let h = match var_type {
                VariableType::Euclidean(_) => STEP * params[idx][d].abs().max(1.0),
                VariableType::SE3 => STEP,
            };
            delta[d] = h;
            let forward = eval(idx, &delta)?;
            delta[d] = -h;
            let backward = eval(idx, &delta)?;
            delta[d] = 0.0;

            jacobian.set_column(col, &((forward - backward) / (2.0 * h)));
            col += 1;
        }
    }

    Ok(LinearizationResult::with_jacobian(residual, jacobian))
}

/// Pulls a Euclidean variable toward `target`: `r = x - target`.
#[derive(Debug, Clone)]
pub struct PriorFactor {
    pub target: Vec<f64>,
}

impl PriorFactor {
    pub fn new(target: Vec<f64>) -> Self {
        Self { target }
    }
}

impl Factor for PriorFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        let [x] = params else {
            return Err(FactorError::DimensionMismatch {
                expected: 1,
                actual: params.len(),
            });
        };
        let n = self.target.len();
        if x.len() != n {
            return Err(FactorError::DimensionMismatch {
                expected: n,
                actual: x.len(),
            });
        }

        let residual = x.iter().zip(&self.target).map(|(a, b)| a - b).collect();
        Ok(if compute_jacobian {
            LinearizationResult::with_jacobian(residual, DMatrix::identity(n, n))
        } else {
            LinearizationResult::residual_only(residual)
        })
    }

    fn residual_dim(&self) -> usize {
        self.target.len()
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        self.target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_prior_residual_and_jacobian() {
        let factor = PriorFactor::new(vec![1.0, 2.0, 3.0]);
        let x = [1.5, 2.5, 3.5];
        let result = factor.linearize(&[&x], true).unwrap();

        assert_eq!(result.residual, DVector::from_element(3, 0.5));
        assert_eq!(result.jacobian, Some(DMatrix::identity(3, 3)));
        assert_relative_eq!(result.squared_norm(), 0.75);
        assert_eq!(factor.total_local_dim(), 3);
        assert!(factor.get_loss().is_none());
    }

    #[test]
    fn test_prior_rejects_two_blocks() {
        let factor = PriorFactor::new(vec![0.0]);
        assert!(factor.linearize(&[&[0.0], &[0.0]], false).is_err());
    }

    #[test]
    fn test_numeric_linearize_matches_analytic() {
        // r = [a*b, a + b^2]
        let result = numeric_linearize(
            &[VariableType::Euclidean(1), VariableType::Euclidean(1)],
            &[&[2.0], &[3.0]],
            true,
            |p| Ok(vec![p[0][0] * p[1][0], p[0][0] + p[1][0] * p[1][0]]),
        )
        .unwrap();

        assert_eq!(result.residual, DVector::from_vec(vec![6.0, 11.0]));
        let expected = DMatrix::from_row_slice(2, 2, &[3.0, 2.0, 1.0, 6.0]);
        assert_relative_eq!(result.jacobian.unwrap(), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_numeric_linearize_se3_translation_block() {
        // r = translation of the pose, so dr/dv = I and dr/dw = 0 at identity rotation
        let pose = [1.0, 0.0, 0.0, 0.0, 0.5, -1.0, 2.0];
        let result = numeric_linearize(&[VariableType::SE3], &[&pose], true, |p| {
            Ok(p[0][4..7].to_vec())
        })
        .unwrap();

        let jacobian = result.jacobian.unwrap();
        assert_eq!(jacobian.shape(), (3, 6));
        assert_relative_eq!(jacobian.columns(0, 3).into_owned(), DMatrix::zeros(3, 3), epsilon = 1e-9);
        assert_relative_eq!(
            jacobian.columns(3, 3).into_owned(),
            DMatrix::identity(3, 3),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_numeric_linearize_rejects_short_block() {
        let err = numeric_linearize(&[VariableType::Euclidean(3)], &[&[1.0, 2.0]], true, |p| {
            Ok(p[0].to_vec())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            FactorError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
