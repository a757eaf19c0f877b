use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::{Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::json::to_json_pretty;
use crate::pose::{pose_from_parts, relative_to, Pose3d};

/// A fiducial and its pose in the layout frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AprilTag {
    /// Tag ID.
    pub id: i32,
    /// Pose of the tag center, x out of the tag face.
    pub pose: Pose3d,
}

impl AprilTag {
    /// Create a tag.
    pub fn new(id: i32, pose: Pose3d) -> Self {
        Self { id, pose }
    }
}

/// Conventional field origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginPosition {
    /// Blue alliance wall, right side corner (the stored frame).
    BlueAllianceWallRightSide,
    /// Red alliance wall, right side corner: the far corner, rotated half a turn.
    RedAllianceWallRightSide,
}

/// Tag ID to pose map plus field dimensions and an origin.
///
/// Stored poses never change; [`AprilTagFieldLayout::get_tag_pose`] expresses
/// them relative to the current origin on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct AprilTagFieldLayout {
    tags: BTreeMap<i32, AprilTag>,
    field_length: f64,
    field_width: f64,
    origin: Pose3d,
}

impl Default for AprilTagFieldLayout {
    fn default() -> Self {
        Self {
            tags: BTreeMap::new(),
            field_length: 0.0,
            field_width: 0.0,
            origin: Pose3d::identity(),
        }
    }
}

impl AprilTagFieldLayout {
    /// Create a layout, rejecting duplicate tag IDs and invalid dimensions.
    pub fn new(
        tags: impl IntoIterator<Item = AprilTag>,
        field_length: f64,
        field_width: f64,
    ) -> Result<Self, LayoutError> {
        if !(field_length.is_finite() && field_width.is_finite())
            || field_length < 0.0
            || field_width < 0.0
        {
            return Err(LayoutError::InvalidField {
                length: field_length,
                width: field_width,
            });
        }

        let mut map = BTreeMap::new();
        for tag in tags {
            if map.insert(tag.id, tag).is_some() {
                return Err(LayoutError::DuplicateTag(tag.id));
            }
        }
        Ok(Self {
            tags: map,
            field_length,
            field_width,
            origin: Pose3d::identity(),
        })
    }

    pub(crate) fn from_map(tags: BTreeMap<i32, AprilTag>, field_length: f64, field_width: f64) -> Self {
        Self {
            tags,
            field_length,
            field_width,
            origin: Pose3d::identity(),
        }
    }

    /// Tags in ascending ID order, with their stored poses.
    pub fn tags(&self) -> impl Iterator<Item = &AprilTag> + '_ {
        self.tags.values()
    }

    /// Tag IDs in ascending order.
    pub fn tag_ids(&self) -> Vec<i32> {
        self.tags.keys().copied().collect()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the layout holds no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Look up a tag by ID.
    pub fn tag(&self, id: i32) -> Option<&AprilTag> {
        self.tags.get(&id)
    }

    /// Pose of tag `id` relative to the current origin.
    pub fn get_tag_pose(&self, id: i32) -> Option<Pose3d> {
        self.tags
            .get(&id)
            .map(|tag| relative_to(&tag.pose, &self.origin))
    }

    /// Replace the origin. Stored tag poses are untouched.
    pub fn set_origin(&mut self, origin: Pose3d) {
        self.origin = origin;
    }

    /// Replace the origin with one of the conventional field corners.
    pub fn set_origin_position(&mut self, position: OriginPosition) {
        let origin = match position {
            OriginPosition::BlueAllianceWallRightSide => Pose3d::identity(),
            OriginPosition::RedAllianceWallRightSide => Pose3d::from_parts(
                Translation3::new(self.field_length, self.field_width, 0.0),
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::PI),
            ),
        };
        self.set_origin(origin);
    }

    /// Current origin.
    pub fn origin(&self) -> &Pose3d {
        &self.origin
    }

    /// Field length in meters.
    pub fn field_length(&self) -> f64 {
        self.field_length
    }

    /// Field width in meters.
    pub fn field_width(&self) -> f64 {
        self.field_width
    }

    /// Parse a WPILib layout JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, LayoutError> {
        let file: LayoutFile = serde_json::from_str(json)?;
        file.into_layout()
    }

    /// Read a WPILib layout JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Serialize the stored tag poses, 4-space indented.
    pub fn to_json_string(&self) -> Result<String, LayoutError> {
        Ok(to_json_pretty(&LayoutFile::from_layout(self))?)
    }

    /// Write the layout as JSON.
    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<(), LayoutError> {
        let json = self.to_json_string()?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    tags: Vec<TagEntry>,
    field: FieldEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldEntry {
    length: f64,
    width: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagEntry {
    #[serde(rename = "ID")]
    id: i32,
    pose: PoseEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct PoseEntry {
    translation: TranslationEntry,
    rotation: RotationEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct TranslationEntry {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RotationEntry {
    quaternion: QuaternionEntry,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct QuaternionEntry {
    w: f64,
    x: f64,
    y: f64,
    z: f64,
}

impl LayoutFile {
    fn from_layout(layout: &AprilTagFieldLayout) -> Self {
        let tags = layout
            .tags()
            .map(|tag| {
                let t = tag.pose.translation.vector;
                let q = tag.pose.rotation;
                TagEntry {
                    id: tag.id,
                    pose: PoseEntry {
                        translation: TranslationEntry {
                            x: t.x,
                            y: t.y,
                            z: t.z,
                        },
                        rotation: RotationEntry {
                            quaternion: QuaternionEntry {
                                w: q.w,
                                x: q.i,
                                y: q.j,
                                z: q.k,
                            },
                        },
                    },
                }
            })
            .collect();
        Self {
            tags,
            field: FieldEntry {
                length: layout.field_length,
                width: layout.field_width,
            },
        }
    }

    fn into_layout(self) -> Result<AprilTagFieldLayout, LayoutError> {
        let tags = self
            .tags
            .into_iter()
            .map(|entry| {
                let t = &entry.pose.translation;
                let q = &entry.pose.rotation.quaternion;
                pose_from_parts([t.x, t.y, t.z], [q.w, q.x, q.y, q.z])
                    .map(|pose| AprilTag::new(entry.id, pose))
                    .ok_or(LayoutError::InvalidQuaternion(entry.id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        AprilTagFieldLayout::new(tags, self.field.length, self.field.width)
    }
}
