//! Camera-relative pose of a single tag from its four corners.
//!
//! Detector corners are expressed in the OpenCV tag frame (x right, y down,
//! z into the tag). Layouts use the WPILib tag frame: x out of the tag face,
//! y to the viewer's right, z up.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};
use wpical_layout::Pose3d;
use wpical_pnp::{refine_pose_lm, LMParams, PinholeCamera, PnPError, IPPE};

/// Rotation taking WPILib tag-frame vectors to the OpenCV tag frame.
pub fn wpilib_to_cv_tag() -> UnitQuaternion<f64> {
    let m = Matrix3::from_columns(&[
        Vector3::new(0.0, 0.0, -1.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, -1.0, 0.0),
    ]);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

/// Tag corners in the WPILib tag frame, in detector order.
pub fn tag_corners(tag_size_m: f64) -> [[f64; 3]; 4] {
    let to_wpilib = wpilib_to_cv_tag().inverse();
    IPPE::square_object_points(tag_size_m).map(|p| {
        let q = to_wpilib * Point3::new(p[0], p[1], p[2]);
        [q.x, q.y, q.z]
    })
}

/// Estimate the camera-from-tag pose (WPILib tag frame) of one detection.
///
/// IPPE gives the two candidate poses from the undistorted corners; the
/// better one is refined against the distorted pixels.
pub fn estimate_tag_pose(
    corners: &[[f64; 2]; 4],
    camera: &PinholeCamera,
    tag_size_m: f64,
) -> Result<Pose3d, PnPError> {
    let mut normalized = [[0.0; 2]; 4];
    for (n, c) in normalized.iter_mut().zip(corners.iter()) {
        *n = camera.normalize_point(c[0], c[1])?;
    }
    let candidates = IPPE::solve_square(&normalized, tag_size_m)?;

    let object = IPPE::square_object_points(tag_size_m);
    let mut rvec = candidates.first.rvec;
    let mut t = candidates.first.translation;
    refine_pose_lm(&object, corners, camera, &mut rvec, &mut t, &LMParams::default())?;

    let camera_from_cv_tag = Isometry3::new(Vector3::from(t), Vector3::from(rvec));
    Ok(camera_from_cv_tag * wpilib_to_cv_tag())
}
