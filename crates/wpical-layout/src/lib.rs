#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # wpical layout
//!
//! Field layouts map AprilTag IDs to 3D poses on the field. This crate reads
//! and writes the WPILib JSON format, re-expresses poses against an origin,
//! merges tags from several calibrations and reports how a calibrated tag
//! differs from the ideal layout.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use wpical_layout::{combine, AprilTag, AprilTagFieldLayout, Pose3d};
//!
//! let ideal = AprilTagFieldLayout::new(
//!     [AprilTag::new(1, Pose3d::translation(1.0, 2.0, 0.5))],
//!     16.54,
//!     8.21,
//! )?;
//! let mut requests = BTreeMap::new();
//! requests.insert(1, None);
//! let combined = combine(&ideal, &requests);
//! assert_eq!(combined.tag_ids(), vec![1]);
//! # Ok::<(), wpical_layout::LayoutError>(())
//! ```

mod combine;
mod compare;
mod error;
mod fmap;
mod json;
mod layout;
mod pose;

pub use combine::combine;
pub use compare::{compare, TagComparison};
pub use error::LayoutError;
pub use fmap::{Fiducial, Fieldmap, FMAP_FAMILY};
pub use json::to_json_pretty;
pub use layout::{AprilTag, AprilTagFieldLayout, OriginPosition};
pub use pose::{pose_from_parts, relative_to, roll_pitch_yaw_degrees, wrap_degrees, Pose3d};
