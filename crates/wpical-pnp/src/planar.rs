//! Pose of a planar target (z = 0 in object coordinates) from many points.

use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::camera::PinholeCamera;
use crate::homography::dlt_homography;
use crate::pnp::{PnPError, PnPResult};
use crate::refine::{refine_pose_lm, LMParams};

/// Solve the pose of a planar target through a homography and LM refinement.
///
/// `points_world` must lie on the plane `z = 0`; `points_image` are pixels
/// as observed by `camera`, lens distortion included. The returned
/// `reproj_rmse` is the per-point RMS reprojection error in pixels.
pub fn solve_planar_pnp(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    camera: &PinholeCamera,
    params: &LMParams,
) -> Result<PnPResult, PnPError> {
    if points_world.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: points_world.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }
    if points_world.len() < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: points_world.len(),
        });
    }

    let normalized = points_image
        .iter()
        .map(|uv| camera.normalize_point(uv[0], uv[1]))
        .collect::<Result<Vec<_>, _>>()?;
    let plane: Vec<[f64; 2]> = points_world.iter().map(|p| [p[0], p[1]]).collect();

    let h = dlt_homography(&plane, &normalized)?;
    let (rotation, translation) = decompose_plane_homography(&h)?;

    let mut rvec: [f64; 3] = rotation.scaled_axis().into();
    let mut t: [f64; 3] = translation.into();
    let outcome = refine_pose_lm(points_world, points_image, camera, &mut rvec, &mut t, params)?;

    let rotation = Rotation3::new(Vector3::from(rvec));
    let mut result = PnPResult::from_rotation(&rotation, &Vector3::from(t));
    result.reproj_rmse = Some(outcome.rmse);
    result.num_iterations = Some(outcome.iterations);
    result.converged = Some(outcome.converged);

    log::trace!(
        "planar pnp: {} points, rmse {:.4}px after {} iterations",
        points_world.len(),
        outcome.rmse,
        outcome.iterations
    );
    Ok(result)
}

/// Split a normalized plane homography `H ~ [r1 r2 t]` into a rotation and translation.
///
/// The scale is the mean of the first two column norms and the sign is picked
/// so the plane lies in front of the camera. The rotation is the closest
/// orthonormal matrix to `[r1 r2 r1 x r2]`.
pub fn decompose_plane_homography(
    h: &Matrix3<f64>,
) -> Result<(Rotation3<f64>, Vector3<f64>), PnPError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm <= f64::EPSILON {
        return Err(PnPError::Degenerate("homography has vanishing columns"));
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(PnPError::SvdFailed("rotation projection".to_string())),
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }

    if t.z <= 0.0 {
        return Err(PnPError::InvalidPose("plane lies behind the camera"));
    }
    Ok((Rotation3::from_matrix_unchecked(r), t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraIntrinsics, PolynomialDistortion};
    use approx::assert_relative_eq;
    use nalgebra::{Point3, UnitQuaternion};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn board() -> Vec<[f64; 3]> {
        let s = 0.018;
        let mut pts = Vec::new();
        for i in 0..7 {
            for j in 0..11 {
                pts.push([j as f64 * s, i as f64 * s, 0.0]);
            }
        }
        pts
    }

    #[test]
    fn test_planar_pnp_with_distortion() -> Result<(), PnPError> {
        let camera = PinholeCamera::with_distortion(
            CameraIntrinsics::new(1100.0, 1100.0, 960.0, 540.0),
            PolynomialDistortion::from_opencv(&[-0.2, 0.05, 1e-3, 5e-4, 0.0, 0.0, 0.0, 0.0]),
        );
        let rotation = Rotation3::from_euler_angles(0.35, -0.25, 0.1);
        let t = Vector3::new(-0.08, -0.05, 0.6);

        let mut rng = StdRng::seed_from_u64(3);
        let world = board();
        let image: Vec<[f64; 2]> = world
            .iter()
            .filter_map(|p| camera.project(&(rotation * Point3::from(*p) + t)))
            .map(|[u, v]| [u + rng.random_range(-0.2..0.2), v + rng.random_range(-0.2..0.2)])
            .collect();

        let result = solve_planar_pnp(&world, &image, &camera, &LMParams::default())?;
        let iso = result.to_isometry();

        assert!(result.reproj_rmse.unwrap_or(f64::MAX) < 0.3);
        assert_relative_eq!(iso.translation.vector, t, epsilon = 2e-3);
        assert!(iso.rotation.angle_to(&UnitQuaternion::from_rotation_matrix(&rotation)) < 5e-3);
        Ok(())
    }

    #[test]
    fn test_decompose_homography_flips_sign() -> Result<(), PnPError> {
        let rotation = Rotation3::from_euler_angles(0.1, 0.2, 0.3);
        let t = Vector3::new(0.1, 0.2, 1.0);
        let m = rotation.matrix();
        let h = Matrix3::from_columns(&[m.column(0).into_owned(), m.column(1).into_owned(), t]);

        let (r, tr) = decompose_plane_homography(&(h * -2.5))?;
        assert_relative_eq!(r.matrix(), m, epsilon = 1e-12);
        assert_relative_eq!(tr, t, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_planar_pnp_needs_four_points() {
        let camera = PinholeCamera::default();
        let world = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let image = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            solve_planar_pnp(&world, &image, &camera, &LMParams::default()),
            Err(PnPError::InsufficientCorrespondences { .. })
        ));
    }
}
