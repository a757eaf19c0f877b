use nalgebra::Vector3;

use crate::error::LayoutError;
use crate::layout::AprilTagFieldLayout;
use crate::pose::{relative_to, roll_pitch_yaw_degrees};

/// How far a calibrated tag sits from where the ideal layout puts it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagComparison {
    /// The tag being inspected.
    pub focused_tag: i32,
    /// The tag used to measure [`TagComparison::reference_offset`].
    pub reference_tag: i32,
    /// Ideal pose expressed in the calibrated tag frame, translation in meters.
    pub translation_difference: Vector3<f64>,
    /// Yaw difference in degrees, in `[-180, 180]`.
    pub yaw_difference_deg: f64,
    /// Pitch difference in degrees, in `[-180, 180]`.
    pub pitch_difference_deg: f64,
    /// Roll difference in degrees, in `[-180, 180]`.
    pub roll_difference_deg: f64,
    /// Calibrated reference tag minus calibrated focused tag, field frame, meters.
    pub reference_offset: Vector3<f64>,
}

/// Compare the `focused` tag of a calibrated layout against the ideal layout.
///
/// Both layouts must hold the same number of tags, the ideal layout must
/// contain both tags and the calibrated one must contain both as well.
pub fn compare(
    ideal: &AprilTagFieldLayout,
    calibrated: &AprilTagFieldLayout,
    focused: i32,
    reference: i32,
) -> Result<TagComparison, LayoutError> {
    if ideal.len() != calibrated.len() {
        return Err(LayoutError::TagCountMismatch {
            calibrated: calibrated.len(),
            ideal: ideal.len(),
        });
    }

    let lookup = |layout: &AprilTagFieldLayout, id: i32, name: &'static str| {
        layout
            .get_tag_pose(id)
            .ok_or(LayoutError::MissingTag { id, layout: name })
    };
    let ideal_focused = lookup(ideal, focused, "ideal")?;
    lookup(ideal, reference, "ideal")?;
    let calibrated_focused = lookup(calibrated, focused, "calibrated")?;
    let calibrated_reference = lookup(calibrated, reference, "calibrated")?;

    let diff = relative_to(&ideal_focused, &calibrated_focused);
    let [roll, pitch, yaw] = roll_pitch_yaw_degrees(&diff);

    Ok(TagComparison {
        focused_tag: focused,
        reference_tag: reference,
        translation_difference: diff.translation.vector,
        yaw_difference_deg: yaw,
        pitch_difference_deg: pitch,
        roll_difference_deg: roll,
        reference_offset: calibrated_reference.translation.vector
            - calibrated_focused.translation.vector,
    })
}
