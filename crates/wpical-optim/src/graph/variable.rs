use nalgebra::Isometry3;

use crate::param::{Param, ParamError};

/// Manifold a variable lives on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableType {
    /// `R^n`, updated by addition.
    Euclidean(usize),
    /// Rigid transform stored as `[qw, qx, qy, qz, tx, ty, tz]`, updated in a
    /// 6-dim tangent space.
    SE3,
}

impl VariableType {
    /// Length of the stored parameter block.
    pub fn global_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SE3 => Isometry3::<f64>::GLOBAL_SIZE,
        }
    }

    /// Number of columns the variable takes in a Jacobian.
    pub fn local_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SE3 => Isometry3::<f64>::LOCAL_SIZE,
        }
    }

    /// Move `x` by the tangent step `delta`, writing the result into `out`.
    pub fn plus(&self, x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        let n = match self {
            VariableType::SE3 => return Isometry3::<f64>::plus(x, delta, out),
            VariableType::Euclidean(n) => *n,
        };
        if x.len() < n {
            return Err(ParamError::WrongGlobalSize {
                expected: n,
                got: x.len(),
            });
        }
        if delta.len() < n {
            return Err(ParamError::WrongLocalSize {
                expected: n,
                got: delta.len(),
            });
        }
        if out.len() < n {
            return Err(ParamError::WrongOutSize {
                expected: n,
                got: out.len(),
            });
        }
        out.iter_mut()
            .zip(x.iter().zip(delta))
            .take(n)
            .for_each(|(o, (a, d))| *o = a + d);
        Ok(())
    }

    /// `x ⊞ delta` as a new parameter block.
    pub fn retract(&self, x: &[f64], delta: &[f64]) -> Result<Vec<f64>, ParamError> {
        let mut out = vec![0.0; self.global_dim()];
        self.plus(x, delta, &mut out)?;
        Ok(out)
    }
}

/// A named parameter block of a [`crate::Problem`].
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VariableType,
    pub values: Vec<f64>,
    /// Held constant by the optimizer.
    pub fixed: bool,
    /// Eliminated with the Schur complement at every step.
    pub marginalized: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: VariableType, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
            fixed: false,
            marginalized: false,
        }
    }

    /// Zero-initialized `R^dim` variable.
    pub fn euclidean(name: impl Into<String>, dim: usize) -> Self {
        Self::new(name, VariableType::Euclidean(dim), vec![0.0; dim])
    }

    /// SE(3) variable at the identity.
    pub fn se3(name: impl Into<String>) -> Self {
        let identity = crate::param::isometry_to_params(&Isometry3::identity());
        Self::new(name, VariableType::SE3, identity)
    }

    #[inline]
    pub fn global_dim(&self) -> usize {
        self.kind.global_dim()
    }

    #[inline]
    pub fn local_dim(&self) -> usize {
        self.kind.local_dim()
    }

    /// Whether the optimizer moves this variable at all.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.fixed
    }
}
