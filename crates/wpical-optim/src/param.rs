//! Local parameterization for optimization on manifolds.
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use thiserror::Error;

/// Errors raised when a parameter block does not have the expected size.
#[derive(Debug, Error)]
pub enum ParamError {
    /// The input global parameter block `x` is too small.
    #[error("global parameter block has wrong size: expected {expected}, got {got}")]
    WrongGlobalSize {
        /// expected number of values
        expected: usize,
        /// provided number of values
        got: usize,
    },

    /// The input local update `delta` is too small.
    #[error("local update has wrong size: expected {expected}, got {got}")]
    WrongLocalSize {
        /// expected number of values
        expected: usize,
        /// provided number of values
        got: usize,
    },

    /// The output buffer `out` is too small.
    #[error("output buffer has wrong size: expected {expected}, got {got}")]
    WrongOutSize {
        /// expected number of values
        expected: usize,
        /// provided number of values
        got: usize,
    },
}

/// A parameter block with a global storage and a local (tangent) update.
pub trait Param {
    /// Size of the global parameter block (as stored in the variable).
    const GLOBAL_SIZE: usize;

    /// Size of the local update (tangent space dimension).
    const LOCAL_SIZE: usize;

    /// Apply a local update `delta` to a global parameter block `x`.
    fn plus(x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError>;
}

/// SE(3) stored as `[qw, qx, qy, qz, tx, ty, tz]` and updated with
/// `[wx, wy, wz, vx, vy, vz]` as `q' = q * exp(w)`, `t' = t + v`.
impl Param for Isometry3<f64> {
    const GLOBAL_SIZE: usize = 7;
    const LOCAL_SIZE: usize = 6;

    fn plus(x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        check_sizes(x, delta, out, Self::GLOBAL_SIZE, Self::LOCAL_SIZE)?;

        let q = UnitQuaternion::from_quaternion(Quaternion::new(x[0], x[1], x[2], x[3]));
        let dq = UnitQuaternion::from_scaled_axis(Vector3::new(delta[0], delta[1], delta[2]));
        let q_new = q * dq;

        out[0] = q_new.w;
        out[1] = q_new.i;
        out[2] = q_new.j;
        out[3] = q_new.k;
        out[4] = x[4] + delta[3];
        out[5] = x[5] + delta[4];
        out[6] = x[6] + delta[5];
        Ok(())
    }
}

fn check_sizes(
    x: &[f64],
    delta: &[f64],
    out: &[f64],
    global: usize,
    local: usize,
) -> Result<(), ParamError> {
    if x.len() < global {
        return Err(ParamError::WrongGlobalSize {
            expected: global,
            got: x.len(),
        });
    }
    if delta.len() < local {
        return Err(ParamError::WrongLocalSize {
            expected: local,
            got: delta.len(),
        });
    }
    if out.len() < global {
        return Err(ParamError::WrongOutSize {
            expected: global,
            got: out.len(),
        });
    }
    Ok(())
}

/// Pack a rigid transform into the SE(3) global parameter layout.
pub fn isometry_to_params(pose: &Isometry3<f64>) -> Vec<f64> {
    let q = pose.rotation;
    let t = pose.translation.vector;
    vec![q.w, q.i, q.j, q.k, t.x, t.y, t.z]
}

/// Unpack an SE(3) parameter block. The quaternion is renormalized.
pub fn isometry_from_params(x: &[f64]) -> Result<Isometry3<f64>, ParamError> {
    if x.len() < 7 {
        return Err(ParamError::WrongGlobalSize {
            expected: 7,
            got: x.len(),
        });
    }
    let q = UnitQuaternion::from_quaternion(Quaternion::new(x[0], x[1], x[2], x[3]));
    Ok(Isometry3::from_parts(Translation3::new(x[4], x[5], x[6]), q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_se3_plus_zero_is_identity() {
        let pose = Isometry3::new(Vector3::new(1.0, -2.0, 0.5), Vector3::new(0.1, 0.2, -0.3));
        let x = isometry_to_params(&pose);
        let mut out = [0.0; 7];
        Isometry3::<f64>::plus(&x, &[0.0; 6], &mut out).unwrap();
        for (a, b) in x.iter().zip(out.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_se3_plus_right_multiplies_rotation() {
        let x = isometry_to_params(&Isometry3::identity());
        let delta = [0.0, 0.0, std::f64::consts::FRAC_PI_2, 1.0, 2.0, 3.0];
        let mut out = [0.0; 7];
        Isometry3::<f64>::plus(&x, &delta, &mut out).unwrap();

        let pose = isometry_from_params(&out).unwrap();
        let rotated = pose.rotation * Vector3::x();
        assert_relative_eq!(rotated, Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(pose.translation.vector, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_se3_plus_size_errors() {
        let mut out = [0.0; 7];
        let err = Isometry3::<f64>::plus(&[0.0; 6], &[0.0; 6], &mut out).unwrap_err();
        assert!(matches!(
            err,
            ParamError::WrongGlobalSize {
                expected: 7,
                got: 6
            }
        ));
        let err = Isometry3::<f64>::plus(&[0.0; 7], &[0.0; 5], &mut out).unwrap_err();
        assert!(matches!(err, ParamError::WrongLocalSize { .. }));
    }
}
