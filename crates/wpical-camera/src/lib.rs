#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # wpical camera
//!
//! Estimates pinhole intrinsics and 8 distortion coefficients from a video of
//! a ChArUco board. [`CameraCalibrator`] decodes the video on one thread,
//! detects the board on a pool of workers and runs [`calibrate_intrinsics`]
//! once every frame is processed.
//!
//! Board detection is pluggable through [`BoardDetector`]; enable the
//! `opencv` feature for `OpenCvCharucoDetector`.

mod board;
mod calibrator;
mod cancel;
mod config;
mod detection;
mod failure;
mod intrinsics;
mod model;

#[cfg(feature = "opencv")]
mod opencv_detector;

pub use board::{BoardError, CharucoBoard, METERS_PER_INCH};
pub use calibrator::CameraCalibrator;
pub use cancel::CancelToken;
pub use config::CameraCalibrationConfig;
pub use detection::{filter_detection, BoardDetection, BoardDetector, ObservationBoard, RejectReason};
pub use failure::CalibrationFailure;
pub use intrinsics::{
    calibrate_intrinsics, principal_point_seed, seed_focal_length, FrameObservation,
    IntrinsicsSolution, MIN_BOARD_VIEWS,
};
pub use model::{CameraModel, CameraModelError, UNSET_REPROJECTION_ERROR};

#[cfg(feature = "opencv")]
pub use opencv_detector::OpenCvCharucoDetector;
