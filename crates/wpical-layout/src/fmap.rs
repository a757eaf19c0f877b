//! Limelight `.fmap` field map export.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::json::to_json_pretty;
use crate::layout::AprilTagFieldLayout;

/// AprilTag family written into every fiducial entry.
pub const FMAP_FAMILY: &str = "apriltag3_36h11_classic";

/// One fiducial of a field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fiducial {
    /// Tag family name.
    pub family: String,
    /// Tag ID.
    pub id: i32,
    /// Tag edge length in millimeters.
    pub size: f64,
    /// Row-major 4x4 pose with the field center as origin.
    pub transform: Vec<f64>,
    /// Whether the ID is unique on the field (always 1).
    pub unique: i32,
}

/// A field map: the layout re-centered on the middle of the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fieldmap {
    /// All fiducials in ascending ID order.
    pub fiducials: Vec<Fiducial>,
    /// Field type, `"frc"`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Fieldmap {
    /// Build a field map from the origin-relative tag poses of `layout`.
    pub fn from_layout(layout: &AprilTagFieldLayout, tag_size_m: f64) -> Self {
        let half_length = layout.field_length() / 2.0;
        let half_width = layout.field_width() / 2.0;

        let fiducials = layout
            .tag_ids()
            .into_iter()
            .filter_map(|id| layout.get_tag_pose(id).map(|pose| (id, pose)))
            .map(|(id, pose)| {
                let r = pose.rotation.to_rotation_matrix();
                let m = r.matrix();
                let t = pose.translation.vector;
                Fiducial {
                    family: FMAP_FAMILY.to_string(),
                    id,
                    size: tag_size_m * 1000.0,
                    transform: vec![
                        m[(0, 0)],
                        m[(0, 1)],
                        m[(0, 2)],
                        t.x - half_length,
                        m[(1, 0)],
                        m[(1, 1)],
                        m[(1, 2)],
                        t.y - half_width,
                        m[(2, 0)],
                        m[(2, 1)],
                        m[(2, 2)],
                        t.z,
                        0.0,
                        0.0,
                        0.0,
                        1.0,
                    ],
                    unique: 1,
                }
            })
            .collect();

        Self {
            fiducials,
            kind: "frc".to_string(),
        }
    }

    /// Serialize, 4-space indented.
    pub fn to_json_string(&self) -> Result<String, LayoutError> {
        Ok(to_json_pretty(self)?)
    }

    /// Write the field map to `path`.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), LayoutError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AprilTag;
    use crate::pose::Pose3d;
    use approx::assert_relative_eq;

    #[test]
    fn test_fieldmap_is_centered() {
        let layout = AprilTagFieldLayout::new(
            [AprilTag::new(5, Pose3d::translation(10.0, 5.0, 1.2))],
            16.0,
            8.0,
        )
        .unwrap();
        let map = Fieldmap::from_layout(&layout, 0.1651);
        assert_eq!(map.kind, "frc");
        let f = &map.fiducials[0];
        assert_eq!(f.id, 5);
        assert_relative_eq!(f.size, 165.1, epsilon = 1e-9);
        assert_relative_eq!(f.transform[3], 2.0);
        assert_relative_eq!(f.transform[7], 1.0);
        assert_relative_eq!(f.transform[11], 1.2);
        assert_relative_eq!(f.transform[0], 1.0);

        let json = map.to_json_string().unwrap();
        assert!(json.contains("\"type\": \"frc\""));
    }
}
