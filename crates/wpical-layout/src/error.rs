use thiserror::Error;

/// Errors raised while building, reading or comparing field layouts.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A tag ID appears more than once.
    #[error("duplicate AprilTag id {0}")]
    DuplicateTag(i32),

    /// A tag pose carries a zero quaternion.
    #[error("AprilTag {0} has a degenerate rotation quaternion")]
    InvalidQuaternion(i32),

    /// Field dimensions are not finite and non-negative.
    #[error("invalid field dimensions {length} x {width}")]
    InvalidField {
        /// Field length in meters.
        length: f64,
        /// Field width in meters.
        width: f64,
    },

    /// Two layouts hold a different number of tags.
    #[error("calibrated layout has {calibrated} tags but the ideal layout has {ideal}")]
    TagCountMismatch {
        /// Tags in the calibrated layout.
        calibrated: usize,
        /// Tags in the ideal layout.
        ideal: usize,
    },

    /// A tag needed for the operation is missing from a layout.
    #[error("AprilTag {id} is not in the {layout} layout")]
    MissingTag {
        /// The missing tag ID.
        id: i32,
        /// Which layout lacks the tag.
        layout: &'static str,
    },
}
