#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # wpical field
//!
//! Solves where every AprilTag on a field actually is. Tags are detected in
//! videos taken around the field, each detection gives a camera-relative tag
//! pose, and a pose graph over tags and frames is refined on corner
//! reprojection error with one tag pinned at its ideal pose.
//!
//! Tag detection is pluggable through [`TagDetector`]; enable the `apriltag`
//! feature for `AprilTagDetector`.

mod calibrator;
mod config;
mod detection;
mod error;
mod graph;
mod tag_pose;

#[cfg(feature = "apriltag")]
mod apriltag_detector;

pub use calibrator::{FieldCalibrationState, FieldCalibrator, FieldWarning};
pub use config::FieldCalibrationConfig;
pub use detection::{TagDetection, TagDetector};
pub use error::FieldError;
pub use graph::{FrameTags, PoseGraph, TagObservation};
pub use tag_pose::{estimate_tag_pose, tag_corners, wpilib_to_cv_tag};

#[cfg(feature = "apriltag")]
pub use apriltag_detector::AprilTagDetector;
