#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Calibration pipelines consume frames through the [`FrameSource`] trait.
//! Image sequences (a directory of stills) always work; video files need the
//! `gstreamer` feature.

mod error;
mod frame;
mod memory;
mod sequence;
mod source;

/// GStreamer video decoding.
#[cfg(feature = "gstreamer")]
pub mod video;

pub use error::IoError;
pub use frame::{FrameSource, GrayFrame, SourceOpener};
pub use memory::MemorySource;
pub use sequence::{ImageSequenceSource, IMAGE_EXTENSIONS};
pub use source::{list_video_inputs, open_source, DefaultOpener, VIDEO_EXTENSIONS};
