#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # wpical PnP
//!
//! Pinhole camera model with 8-coefficient rational distortion, plus the pose
//! solvers used by calibration: a homography-seeded planar PnP with
//! Levenberg–Marquardt refinement, and IPPE for square fiducials.
//!
//! ## Example: planar board pose
//!
//! ```rust
//! use wpical_pnp::{solve_planar_pnp, CameraIntrinsics, LMParams, PinholeCamera};
//!
//! let camera = PinholeCamera::pinhole(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
//!
//! let world = vec![
//!     [0.0, 0.0, 0.0],
//!     [0.1, 0.0, 0.0],
//!     [0.1, 0.1, 0.0],
//!     [0.0, 0.1, 0.0],
//!     [0.05, 0.05, 0.0],
//! ];
//! // board 1m in front of the camera, axis aligned
//! let image: Vec<[f64; 2]> = world
//!     .iter()
//!     .map(|p| [320.0 + 800.0 * p[0], 240.0 + 800.0 * p[1]])
//!     .collect();
//!
//! let result = solve_planar_pnp(&world, &image, &camera, &LMParams::default())?;
//! assert!((result.translation[2] - 1.0).abs() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera and lens distortion.
pub mod camera;

/// Direct linear transform homographies and focal length initialization.
pub mod homography;

/// Infinitesimal Plane-based Pose Estimation for squares.
pub mod ippe;

/// Planar target pose estimation.
pub mod planar;

/// Common data types for the pose solvers.
pub mod pnp;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

pub use camera::{CameraError, CameraIntrinsics, CameraResult, PinholeCamera, PolynomialDistortion};
pub use homography::{dlt_homography, focal_from_homographies};
pub use ippe::{IPPEResult, IPPE};
pub use planar::{decompose_plane_homography, solve_planar_pnp};
pub use pnp::{PnPError, PnPResult};
pub use refine::{refine_pose_lm, LMParams, RefineOutcome};
