use std::fs;
use std::path::{Path, PathBuf};

use image::ImageReader;

use crate::error::IoError;
use crate::frame::{FrameSource, GrayFrame};

/// Image file extensions read as frames, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm"];

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| extensions.contains(&e.as_str()))
}

/// A directory of still images played back as a video, in file name order.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    size: (usize, usize),
}

impl ImageSequenceSource {
    /// Open a directory. The first image fixes the frame size.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IoError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(IoError::FileNotFound(dir.to_path_buf()));
        }
        let mut paths = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_extension(p, IMAGE_EXTENSIONS))
            .collect::<Vec<_>>();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| IoError::EmptySequence(dir.to_path_buf()))?;
        let first = decode(first)?;
        let size = first.size();
        log::debug!(
            "image sequence {}: {} frames of {}x{}",
            dir.display(),
            paths.len(),
            size.0,
            size.1
        );

        Ok(Self {
            paths,
            cursor: 0,
            size,
        })
    }
}

fn decode(path: &Path) -> Result<GrayFrame, IoError> {
    let decoded = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| IoError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    GrayFrame::new(0, width, height, decoded.into_raw())
}

impl FrameSource for ImageSequenceSource {
    fn frame_size(&self) -> (usize, usize) {
        self.size
    }

    fn total_frames(&self) -> Option<usize> {
        Some(self.paths.len())
    }

    fn next_frame(&mut self) -> Result<Option<GrayFrame>, IoError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let mut frame = decode(path)?;
        if frame.size() != self.size {
            return Err(IoError::FrameSizeMismatch {
                expected: self.size,
                actual: frame.size(),
            });
        }
        frame.index = self.cursor;
        self.cursor += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_matching() {
        assert!(has_extension(Path::new("a/b/frame_001.PNG"), IMAGE_EXTENSIONS));
        assert!(!has_extension(Path::new("notes.txt"), IMAGE_EXTENSIONS));
        assert!(!has_extension(Path::new("noext"), IMAGE_EXTENSIONS));
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            ImageSequenceSource::open("/nonexistent/wpical/frames"),
            Err(IoError::FileNotFound(_))
        ));
    }
}
