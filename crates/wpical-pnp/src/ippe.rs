//! Infinitesimal Plane-based Pose Estimation (IPPE)
//!
//! Estimates the two candidate poses of a planar square from its four image
//! corners. A square seen under weak perspective is ambiguous; both solutions
//! are returned, sorted by reprojection error.
//!
//! References:
//! - T. Collins and A. Bartoli, "Infinitesimal Plane-based Pose Estimation"
//! - OpenCV implementation reference: modules/calib3d/src/ippe.hpp/.cpp

use nalgebra::{Matrix2, Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::homography::dlt_homography;
use crate::pnp::{rmse_normalized, PnPError, PnPResult};

/// Result holding the two IPPE pose solutions sorted by reprojection error (best first).
#[derive(Debug, Clone)]
pub struct IPPEResult {
    /// Lowest-error pose solution.
    pub first: PnPResult,
    /// Second pose solution.
    pub second: PnPResult,
}

/// Marker type for the IPPE solver.
pub struct IPPE;

impl IPPE {
    /// Object coordinates of the square corners in the order [`IPPE::solve_square`] expects.
    ///
    ///  - p0 = [-L/2,  L/2, 0]
    ///  - p1 = [ L/2,  L/2, 0]
    ///  - p2 = [ L/2, -L/2, 0]
    ///  - p3 = [-L/2, -L/2, 0]
    pub fn square_object_points(square_length: f64) -> [[f64; 3]; 4] {
        let h = square_length / 2.0;
        [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]]
    }

    /// Estimate two candidate poses for a square planar object from its four image corners.
    ///
    /// The object points are [`IPPE::square_object_points`]. The
    /// `image_points_norm` are the corresponding undistorted, normalized image
    /// coordinates (i.e. pixel coordinates premultiplied by K^{-1}).
    pub fn solve_square(
        image_points_norm: &[[f64; 2]; 4],
        square_length: f64,
    ) -> Result<IPPEResult, PnPError> {
        if !(square_length > 0.0) {
            return Err(PnPError::Degenerate("square length must be positive"));
        }
        let object = Self::square_object_points(square_length);
        let src: Vec<[f64; 2]> = object.iter().map(|p| [p[0], p[1]]).collect();

        // homography from the centered object plane to the normalized image
        let h = dlt_homography(&src, image_points_norm)?;
        let h = h / h[(2, 2)];

        let p = h[(0, 2)];
        let q = h[(1, 2)];
        let jac = Matrix2::new(
            h[(0, 0)] - h[(2, 0)] * p,
            h[(0, 1)] - h[(2, 1)] * p,
            h[(1, 0)] - h[(2, 0)] * q,
            h[(1, 1)] - h[(2, 1)] * q,
        );

        let (r1, r2) = compute_rotations(&jac, p, q)?;

        let mut solutions = Vec::with_capacity(2);
        for rotation in [r1, r2] {
            let translation = compute_translation(&object, image_points_norm, &rotation)?;
            let rmse = rmse_normalized(&object, image_points_norm, &rotation, &translation)?;
            let mut result = PnPResult::from_rotation(&rotation, &translation);
            result.reproj_rmse = Some(rmse);
            solutions.push(result);
        }

        solutions.sort_by(|a, b| {
            let ea = a.reproj_rmse.unwrap_or(f64::INFINITY);
            let eb = b.reproj_rmse.unwrap_or(f64::INFINITY);
            ea.total_cmp(&eb)
        });
        let second = solutions.pop();
        let first = solutions.pop();
        match (first, second) {
            (Some(first), Some(second)) => Ok(IPPEResult { first, second }),
            _ => Err(PnPError::Degenerate("IPPE produced no solution")),
        }
    }
}

/// The two rotations consistent with the homography Jacobian `jac` at the
/// plane origin, which projects to the normalized image point `(p, q)`.
fn compute_rotations(
    jac: &Matrix2<f64>,
    p: f64,
    q: f64,
) -> Result<(Rotation3<f64>, Rotation3<f64>), PnPError> {
    // rotation taking the optical axis onto the ray through (p, q)
    let ray = Vector3::new(p, q, 1.0);
    let rv = UnitQuaternion::rotation_between(&Vector3::z(), &ray)
        .unwrap_or_else(UnitQuaternion::identity)
        .to_rotation_matrix();
    let rv = rv.matrix();

    let b = Matrix2::new(
        rv[(0, 0)] - p * rv[(2, 0)],
        rv[(0, 1)] - p * rv[(2, 1)],
        rv[(1, 0)] - q * rv[(2, 0)],
        rv[(1, 1)] - q * rv[(2, 1)],
    );
    let b_inv = b
        .try_inverse()
        .ok_or(PnPError::Degenerate("singular IPPE basis"))?;
    let a = b_inv * jac;

    // largest singular value of A
    let ata = a * a.transpose();
    let (t00, t01, t11) = (ata[(0, 0)], ata[(0, 1)], ata[(1, 1)]);
    let gamma2 = 0.5 * (t00 + t11 + ((t00 - t11).powi(2) + 4.0 * t01 * t01).sqrt());
    if !(gamma2 > f64::EPSILON) {
        return Err(PnPError::Degenerate("homography Jacobian vanishes"));
    }
    let r_tilde = a / gamma2.sqrt();

    let b0 = (1.0 - r_tilde[(0, 0)].powi(2) - r_tilde[(1, 0)].powi(2))
        .max(0.0)
        .sqrt();
    let mut b1 = (1.0 - r_tilde[(0, 1)].powi(2) - r_tilde[(1, 1)].powi(2))
        .max(0.0)
        .sqrt();
    let sp = -(r_tilde[(0, 0)] * r_tilde[(0, 1)] + r_tilde[(1, 0)] * r_tilde[(1, 1)]);
    if sp < 0.0 {
        b1 = -b1;
    }

    let build = |sign: f64| {
        let c1 = Vector3::new(r_tilde[(0, 0)], r_tilde[(1, 0)], sign * b0);
        let c2 = Vector3::new(r_tilde[(0, 1)], r_tilde[(1, 1)], sign * b1);
        let c3 = c1.cross(&c2);
        let local = Matrix3::from_columns(&[c1, c2, c3]);
        Rotation3::from_matrix(&(rv * local))
    };

    Ok((build(1.0), build(-1.0)))
}

/// Least-squares translation for a fixed rotation: each point contributes
/// `[1 0 -u; 0 1 -v] (R p + t) = 0`.
fn compute_translation(
    object: &[[f64; 3]],
    image_norm: &[[f64; 2]],
    rotation: &Rotation3<f64>,
) -> Result<Vector3<f64>, PnPError> {
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    for (pw, uv) in object.iter().zip(image_norm.iter()) {
        let rp = rotation * Vector3::new(pw[0], pw[1], pw[2]);
        for row in [
            Vector3::new(1.0, 0.0, -uv[0]),
            Vector3::new(0.0, 1.0, -uv[1]),
        ] {
            let rhs = -row.dot(&rp);
            ata += row * row.transpose();
            atb += row * rhs;
        }
    }
    ata.lu()
        .solve(&atb)
        .ok_or(PnPError::Degenerate("translation system is singular"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(rotation: &Rotation3<f64>, t: &Vector3<f64>, length: f64) -> [[f64; 2]; 4] {
        let object = IPPE::square_object_points(length);
        let mut out = [[0.0; 2]; 4];
        for (o, p) in out.iter_mut().zip(object.iter()) {
            let pc = rotation * Vector3::new(p[0], p[1], p[2]) + t;
            *o = [pc.x / pc.z, pc.y / pc.z];
        }
        out
    }

    #[test]
    fn test_ippe_recovers_tilted_square() -> Result<(), PnPError> {
        let rotation = Rotation3::from_euler_angles(0.4, -0.3, 0.2);
        let t = Vector3::new(0.1, -0.05, 1.5);
        let image = project(&rotation, &t, 0.1651);

        let result = IPPE::solve_square(&image, 0.1651)?;
        let best = result.first.to_isometry();

        assert!(result.first.reproj_rmse.unwrap_or(1.0) < 1e-9);
        assert_relative_eq!(best.translation.vector, t, epsilon = 1e-7);
        assert!(best.rotation.angle_to(&UnitQuaternion::from_rotation_matrix(&rotation)) < 1e-7);

        // the mirrored solution explains the corners less well
        assert!(
            result.second.reproj_rmse.unwrap_or(0.0) >= result.first.reproj_rmse.unwrap_or(0.0)
        );
        Ok(())
    }

    #[test]
    fn test_ippe_solutions_are_proper_rotations() -> Result<(), PnPError> {
        let rotation = Rotation3::from_euler_angles(-0.2, 0.5, -1.0);
        let t = Vector3::new(-0.2, 0.1, 2.0);
        let image = project(&rotation, &t, 0.2);

        let result = IPPE::solve_square(&image, 0.2)?;
        for sol in [&result.first, &result.second] {
            let iso = sol.to_isometry();
            let m = iso.rotation.to_rotation_matrix();
            assert_relative_eq!(m.matrix().determinant(), 1.0, epsilon = 1e-9);
        }
        assert!(result.first.translation[2] > 0.0);
        Ok(())
    }

    #[test]
    fn test_ippe_rejects_bad_length() {
        let image = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert!(matches!(
            IPPE::solve_square(&image, 0.0),
            Err(PnPError::Degenerate(_))
        ));
    }
}
