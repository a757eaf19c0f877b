use wpical_camera::METERS_PER_INCH;

/// Settings of a field calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCalibrationConfig {
    /// Printed tag side (black border) in meters.
    pub tag_size_m: f64,
    /// Process every n-th frame of each video.
    pub frame_stride: usize,
    /// LM iteration budget of the pose-graph solve.
    pub max_iterations: usize,
    /// Huber threshold on the per-tag corner residual, in pixels.
    pub huber_delta_px: f64,
    /// Highest tag ID that may be pinned. Detections are not limited by it.
    pub max_frc_tag: i32,
}

impl Default for FieldCalibrationConfig {
    fn default() -> Self {
        Self {
            tag_size_m: 6.5 * METERS_PER_INCH,
            frame_stride: 1,
            max_iterations: 200,
            huber_delta_px: 2.0,
            max_frc_tag: 22,
        }
    }
}
