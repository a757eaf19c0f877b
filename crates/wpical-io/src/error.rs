use std::path::PathBuf;

/// An error type for frame sources.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The input path does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// An image in a sequence failed to decode.
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        /// The image that failed.
        path: PathBuf,
        /// Decoder error.
        source: image::ImageError,
    },

    /// The directory holds no readable frames.
    #[error("No frames found in {0}")]
    EmptySequence(PathBuf),

    /// A frame does not match the size of the first frame.
    #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSizeMismatch {
        /// Size of the first frame.
        expected: (usize, usize),
        /// Size of the offending frame.
        actual: (usize, usize),
    },

    /// Pixel buffer length does not match width * height.
    #[error("Invalid frame buffer: {width}x{height} needs {expected} bytes, got {actual}")]
    InvalidBuffer {
        /// Frame width.
        width: usize,
        /// Frame height.
        height: usize,
        /// Required byte count.
        expected: usize,
        /// Provided byte count.
        actual: usize,
    },

    /// No backend can decode this input.
    #[error("Unsupported input {0}: build with the `gstreamer` feature to decode video files")]
    Unsupported(PathBuf),

    /// An error reported by the GStreamer pipeline.
    #[cfg(feature = "gstreamer")]
    #[error("GStreamer: {0}")]
    Gstreamer(String),
}
