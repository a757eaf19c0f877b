use std::path::Path;

use crate::error::IoError;

/// An 8-bit single channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    /// Zero based position of the frame in its source.
    pub index: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Row-major pixels, `width * height` bytes.
    pub data: Vec<u8>,
}

impl GrayFrame {
    /// Create a frame, checking the buffer length.
    pub fn new(index: usize, width: usize, height: usize, data: Vec<u8>) -> Result<Self, IoError> {
        let expected = width * height;
        if data.len() != expected {
            return Err(IoError::InvalidBuffer {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            index,
            width,
            height,
            data,
        })
    }

    /// Pixel at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// `(width, height)`.
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// A sequential producer of grayscale frames.
pub trait FrameSource: Send {
    /// Native `(width, height)` of every frame.
    fn frame_size(&self) -> (usize, usize);

    /// Total frame count from the source metadata, when known.
    fn total_frames(&self) -> Option<usize>;

    /// Next frame, or `None` at the end of the stream.
    fn next_frame(&mut self) -> Result<Option<GrayFrame>, IoError>;
}

/// Opens a [`FrameSource`] for a path.
pub trait SourceOpener: Send + Sync {
    /// Open `path` for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, IoError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&Path) -> Result<Box<dyn FrameSource>, IoError> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, IoError> {
        self(path)
    }
}
