use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IoError;
use crate::frame::{FrameSource, SourceOpener};
use crate::sequence::{has_extension, ImageSequenceSource};

/// Video file extensions, lowercase.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "m4v", "mjpeg"];

/// Opens directories as image sequences and files as videos.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, IoError> {
        open_source(path)
    }
}

/// Open `path` with the backend that fits it.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>, IoError> {
    if !path.exists() {
        return Err(IoError::FileNotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path)?));
    }
    open_video(path)
}

#[cfg(feature = "gstreamer")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, IoError> {
    Ok(Box::new(crate::video::VideoReader::open(path)?))
}

#[cfg(not(feature = "gstreamer"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, IoError> {
    Err(IoError::Unsupported(path.to_path_buf()))
}

/// Calibration inputs inside `dir`: video files and image-sequence
/// subdirectories, sorted by path. Other entries are skipped.
pub fn list_video_inputs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, IoError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(IoError::FileNotFound(dir.to_path_buf()));
    }
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() || has_extension(&path, VIDEO_EXTENSIONS) {
            inputs.push(path);
        } else {
            log::debug!("skipping {}: not a video", path.display());
        }
    }
    inputs.sort();
    Ok(inputs)
}
