use wpical_io::GrayFrame;

/// One AprilTag found in a frame.
///
/// Corners are in pixels, ordered as the tag36h11 detector reports them:
/// tag-frame `(-1, 1), (1, 1), (1, -1), (-1, -1)` with the tag's y axis
/// pointing down the image.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDetection {
    /// Decoded tag ID.
    pub id: i32,
    /// Corner pixels.
    pub corners: [[f64; 2]; 4],
}

/// Finds AprilTags in a grayscale frame.
pub trait TagDetector: Send + Sync {
    fn detect(&self, frame: &GrayFrame) -> Vec<TagDetection>;
}
