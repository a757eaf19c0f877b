use thiserror::Error;

/// Why a calibration produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationFailure {
    /// The input video could not be opened, or the directory holds no video.
    #[error("no video found: {0}")]
    NoVideoFound(String),

    /// Not enough usable detections to solve.
    #[error("insufficient observations: {0}")]
    InsufficientObservations(String),

    /// The pinned tag is outside `1..=max`.
    #[error("pinned tag {id} is outside 1..={max}")]
    PinnedTagOutOfRange {
        /// Requested tag.
        id: i32,
        /// Highest allowed tag.
        max: i32,
    },

    /// The pinned tag has no pose in the ideal layout.
    #[error("pinned tag {0} is not in the ideal layout")]
    PinnedTagNotInIdealLayout(i32),

    /// No video saw the pinned tag.
    #[error("pinned tag {0} was never observed")]
    PinnedTagNotObserved(i32),

    /// The pinned tag was seen, but never in a frame with another tag.
    #[error("pinned tag {0} was never seen together with another tag")]
    PinnedTagIsolated(i32),

    /// The camera model is unset or unusable.
    #[error("invalid camera model: {0}")]
    InvalidCameraModel(String),

    /// The ideal layout could not be used.
    #[error("invalid ideal layout: {0}")]
    InvalidIdealLayout(String),

    /// The optimizer failed or produced a non-finite result.
    #[error("solve did not converge: {0}")]
    SolveDidNotConverge(String),

    /// `stop()` was called.
    #[error("calibration was cancelled")]
    Cancelled,
}
