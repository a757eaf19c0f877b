//! Robust loss functions for least squares optimization.

use crate::graph::FactorError;

/// Trait for robust loss functions that scale residuals by weight.
///
/// `cost` is the loss `rho(s)` applied to the squared residual norm `s` and
/// `weight` its derivative, so that the reweighted normal equations match the
/// cost the optimizer accepts steps on.
pub trait RobustLoss: Send + Sync {
    /// Compute loss weight for a squared residual norm.
    fn weight(&self, squared_norm: f64) -> f64;

    /// Robustified cost for a squared residual norm.
    fn cost(&self, squared_norm: f64) -> f64;
}

/// Identity loss: weight always 1.0 (L2 baseline).
#[derive(Debug, Clone, Copy)]
pub struct IdentityLoss;

impl RobustLoss for IdentityLoss {
    fn weight(&self, _squared_norm: f64) -> f64 {
        1.0
    }

    fn cost(&self, squared_norm: f64) -> f64 {
        squared_norm
    }
}

/// Huber loss: smooth transition from quadratic to linear weighting.
#[derive(Debug, Clone, Copy)]
pub struct HuberLoss {
    pub delta: f64,
}

impl HuberLoss {
    /// Create new Huber loss. Fails if delta <= 0.
    pub fn new(delta: f64) -> Result<Self, FactorError> {
        if delta.is_nan() || delta <= 0.0 {
            return Err(FactorError::InvalidParameters(format!(
                "Huber delta must be positive, got {delta}"
            )));
        }
        Ok(HuberLoss { delta })
    }
}

impl RobustLoss for HuberLoss {
    fn weight(&self, squared_norm: f64) -> f64 {
        let delta_sq = self.delta * self.delta;
        if squared_norm <= delta_sq {
            1.0
        } else {
            self.delta / squared_norm.sqrt()
        }
    }

    fn cost(&self, squared_norm: f64) -> f64 {
        let delta_sq = self.delta * self.delta;
        if squared_norm <= delta_sq {
            squared_norm
        } else {
            2.0 * self.delta * squared_norm.sqrt() - delta_sq
        }
    }
}

/// Cauchy loss: aggressive outlier rejection via 1/(1 + s/σ²).
#[derive(Debug, Clone, Copy)]
pub struct CauchyLoss {
    pub scale: f64,
}

impl CauchyLoss {
    /// Create new Cauchy loss. Fails if scale <= 0.
    pub fn new(scale: f64) -> Result<Self, FactorError> {
        if scale.is_nan() || scale <= 0.0 {
            return Err(FactorError::InvalidParameters(format!(
                "Cauchy scale must be positive, got {scale}"
            )));
        }
        Ok(CauchyLoss { scale })
    }
}

impl RobustLoss for CauchyLoss {
    fn weight(&self, squared_norm: f64) -> f64 {
        let scale_sq = self.scale * self.scale;
        1.0 / (1.0 + squared_norm / scale_sq)
    }

    fn cost(&self, squared_norm: f64) -> f64 {
        let scale_sq = self.scale * self.scale;
        scale_sq * (1.0 + squared_norm / scale_sq).ln()
    }
}
