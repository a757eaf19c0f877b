use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};

/// A rigid 3D pose in meters, rotation as a unit quaternion.
pub type Pose3d = Isometry3<f64>;

/// Express `pose` in the frame of `origin`.
pub fn relative_to(pose: &Pose3d, origin: &Pose3d) -> Pose3d {
    origin.inverse() * pose
}

/// Build a pose from a translation and a `(w, x, y, z)` quaternion.
///
/// The quaternion is normalized; `None` if it has (near) zero norm.
pub fn pose_from_parts(translation: [f64; 3], wxyz: [f64; 4]) -> Option<Pose3d> {
    let q = Quaternion::new(wxyz[0], wxyz[1], wxyz[2], wxyz[3]);
    let rotation = UnitQuaternion::try_new(q, 1e-12)?;
    Some(Isometry3::from_parts(
        Translation3::new(translation[0], translation[1], translation[2]),
        rotation,
    ))
}

/// Roll, pitch and yaw (rotations about x, y, z) in degrees.
pub fn roll_pitch_yaw_degrees(pose: &Pose3d) -> [f64; 3] {
    let (roll, pitch, yaw) = pose.rotation.euler_angles();
    [
        wrap_degrees(roll.to_degrees()),
        wrap_degrees(pitch.to_degrees()),
        wrap_degrees(yaw.to_degrees()),
    ]
}

/// Wrap an angle in degrees to `[-180, 180]`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && angle > 0.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_relative_to_identity_origin() {
        let pose = Pose3d::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.0, 0.5));
        let rel = relative_to(&pose, &Pose3d::identity());
        assert_relative_eq!(rel, pose, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_to_rotated_origin() {
        let origin = Pose3d::new(
            Vector3::new(16.0, 8.0, 0.0),
            Vector3::new(0.0, 0.0, std::f64::consts::PI),
        );
        let pose = Pose3d::translation(15.0, 7.0, 1.0);
        let rel = relative_to(&pose, &origin);
        assert_relative_eq!(rel.translation.vector, Vector3::new(1.0, 1.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(origin * rel, pose, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_from_parts_normalizes() {
        let pose = pose_from_parts([1.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0]).unwrap();
        assert_relative_eq!(pose.rotation.w, 1.0);
        assert!(pose_from_parts([0.0; 3], [0.0; 4]).is_none());
    }

    #[test]
    fn test_wrap_degrees() {
        assert_relative_eq!(wrap_degrees(190.0), -170.0);
        assert_relative_eq!(wrap_degrees(-190.0), 170.0);
        assert_relative_eq!(wrap_degrees(180.0), 180.0);
        assert_relative_eq!(wrap_degrees(-180.0), -180.0);
        assert_relative_eq!(wrap_degrees(720.0 + 45.0), 45.0);
    }

    #[test]
    fn test_roll_pitch_yaw() {
        let pose = Pose3d::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 0.25));
        let [roll, pitch, yaw] = roll_pitch_yaw_degrees(&pose);
        assert_relative_eq!(roll, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-12);
        assert_relative_eq!(yaw, 0.25f64.to_degrees(), epsilon = 1e-9);
    }
}
