use std::collections::BTreeMap;

use crate::layout::{AprilTag, AprilTagFieldLayout};

/// Merge per-tag poses from several calibrated layouts into one.
///
/// For each requested tag: a source layout holding the tag supplies its pose;
/// without a source the ideal pose is used; a source that lacks the tag falls
/// back to the ideal pose, and the tag is skipped when the ideal lacks it too.
/// Unrequested tags are never included and field dimensions come from `ideal`.
/// Poses are taken relative to each layout's origin.
pub fn combine(
    ideal: &AprilTagFieldLayout,
    requests: &BTreeMap<i32, Option<&AprilTagFieldLayout>>,
) -> AprilTagFieldLayout {
    let mut tags = BTreeMap::new();
    for (&id, source) in requests {
        let pose = match source {
            Some(layout) => layout.get_tag_pose(id).or_else(|| {
                log::warn!("tag {id} is missing from its source layout, using the ideal pose");
                ideal.get_tag_pose(id)
            }),
            None => ideal.get_tag_pose(id),
        };
        match pose {
            Some(pose) => {
                tags.insert(id, AprilTag::new(id, pose));
            }
            None => log::warn!("tag {id} is in neither its source nor the ideal layout, skipping"),
        }
    }
    AprilTagFieldLayout::from_map(tags, ideal.field_length(), ideal.field_width())
}
