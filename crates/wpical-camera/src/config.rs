use crate::board::{BoardError, CharucoBoard, METERS_PER_INCH};

/// Settings of a camera calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibrationConfig {
    /// Detection worker threads, at least one is used.
    pub num_workers: usize,
    /// Chessboard square side in meters.
    pub square_width_m: f64,
    /// ArUco marker side in meters.
    pub marker_width_m: f64,
    /// Squares along x.
    pub board_width: usize,
    /// Squares along y.
    pub board_height: usize,
    /// Detections with fewer corners are dropped.
    pub min_corners: usize,
    /// LM iteration budget shared by all solve stages.
    pub max_iterations: usize,
    /// Decoded frames buffered ahead of the workers.
    pub queue_capacity: usize,
}

impl Default for CameraCalibrationConfig {
    fn default() -> Self {
        Self {
            num_workers: 8,
            square_width_m: 0.709 * METERS_PER_INCH,
            marker_width_m: 0.551 * METERS_PER_INCH,
            board_width: 12,
            board_height: 8,
            min_corners: 10,
            max_iterations: 1000,
            queue_capacity: 32,
        }
    }
}

impl CameraCalibrationConfig {
    /// Defaults with the board given in inches and squares.
    pub fn from_inches(
        num_workers: usize,
        square_width_in: f64,
        marker_width_in: f64,
        board_width: usize,
        board_height: usize,
    ) -> Self {
        Self {
            num_workers,
            square_width_m: square_width_in * METERS_PER_INCH,
            marker_width_m: marker_width_in * METERS_PER_INCH,
            board_width,
            board_height,
            ..Self::default()
        }
    }

    pub fn board(&self) -> Result<CharucoBoard, BoardError> {
        CharucoBoard::new(
            self.board_width,
            self.board_height,
            self.square_width_m,
            self.marker_width_m,
        )
    }
}
