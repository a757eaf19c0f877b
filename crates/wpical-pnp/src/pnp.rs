//! Result and error types of the pose solvers.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::camera::CameraError;

/// Failures of the pose solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Fewer point pairs than the solver needs.
    #[error("need at least {required} point correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Solver minimum.
        required: usize,
        /// Points given.
        actual: usize,
    },

    /// Paired inputs of different lengths.
    #[error("{left_name} has {left_len} entries but {right_name} has {right_len}")]
    MismatchedArrayLengths {
        /// First input.
        left_name: &'static str,
        /// Its length.
        left_len: usize,
        /// Second input.
        right_name: &'static str,
        /// Its length.
        right_len: usize,
    },

    /// SVD did not produce the needed factors.
    #[error("SVD failed: {0}")]
    SvdFailed(String),

    /// Points do not pin down a unique pose.
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),

    /// Pose puts points on or behind the camera.
    #[error("invalid pose: {0}")]
    InvalidPose(&'static str),

    /// Undistortion failed.
    #[error(transparent)]
    CameraError(#[from] CameraError),
}

/// Camera-from-world pose found by a solver.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Row-major rotation, world to camera.
    pub rotation: [[f64; 3]; 3],
    /// Translation, world to camera.
    pub translation: [f64; 3],
    /// Axis-angle form of `rotation`.
    pub rvec: [f64; 3],
    /// Per-point RMS reprojection error, when the solver computes one.
    pub reproj_rmse: Option<f64>,
    /// Refinement iterations, for iterative solvers.
    pub num_iterations: Option<usize>,
    /// Whether refinement converged, for iterative solvers.
    pub converged: Option<bool>,
}

impl PnPResult {
    pub(crate) fn from_rotation(rotation: &Rotation3<f64>, translation: &Vector3<f64>) -> Self {
        let m = rotation.matrix();
        let rvec = rotation.scaled_axis();
        Self {
            rotation: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            translation: [translation.x, translation.y, translation.z],
            rvec: [rvec.x, rvec.y, rvec.z],
            reproj_rmse: None,
            num_iterations: None,
            converged: None,
        }
    }

    /// World-to-camera transform as an isometry.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let r = &self.rotation;
        let m = Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        );
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m));
        let t = Translation3::new(self.translation[0], self.translation[1], self.translation[2]);
        Isometry3::from_parts(t, rotation)
    }
}

/// Project `R p + t` and return the per-point RMS distance to the observed
/// normalized image points.
pub(crate) fn rmse_normalized(
    points_world: &[[f64; 3]],
    points_norm: &[[f64; 2]],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> Result<f64, PnPError> {
    let mut sum_sq = 0.0;
    for (pw, uv) in points_world.iter().zip(points_norm.iter()) {
        let pc = rotation * Vector3::new(pw[0], pw[1], pw[2]) + translation;
        if pc.z.abs() < 1e-9 {
            return Err(PnPError::InvalidPose(
                "projection has near-zero depth along z axis",
            ));
        }
        let du = pc.x / pc.z - uv[0];
        let dv = pc.y / pc.z - uv[1];
        sum_sq += du * du + dv * dv;
    }
    Ok((sum_sq / points_world.len().max(1) as f64).sqrt())
}
