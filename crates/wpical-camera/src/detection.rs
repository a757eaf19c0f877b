use wpical_io::GrayFrame;

use crate::board::CharucoBoard;

/// ChArUco corners and ArUco markers found in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardDetection {
    /// IDs of the interpolated chessboard corners.
    pub charuco_ids: Vec<i32>,
    /// Pixel positions matching `charuco_ids`.
    pub charuco_corners: Vec<[f64; 2]>,
    /// IDs of the detected ArUco markers.
    pub marker_ids: Vec<i32>,
}

/// Finds a ChArUco board in a grayscale frame.
///
/// Implementations are shared by every worker thread.
pub trait BoardDetector: Send + Sync {
    /// Detect the board, `None` when nothing usable was found.
    fn detect(&self, frame: &GrayFrame) -> Option<BoardDetection>;
}

/// Why a detection was dropped before calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Fewer corners than the configured minimum.
    TooFewCorners {
        /// Corners found.
        found: usize,
        /// Corners needed.
        required: usize,
    },
    /// A corner ID outside `0..corner_count` (or negative).
    CornerIdOutOfRange(i32),
    /// A marker ID outside `0..marker_count` (or negative).
    MarkerIdOutOfRange(i32),
    /// Corner IDs and positions differ in length.
    LengthMismatch,
}

/// Check a detection against the board before it is used.
pub fn filter_detection(
    detection: &BoardDetection,
    board: &CharucoBoard,
    min_corners: usize,
) -> Result<(), RejectReason> {
    if detection.charuco_ids.len() != detection.charuco_corners.len() {
        return Err(RejectReason::LengthMismatch);
    }
    if detection.charuco_ids.len() < min_corners {
        return Err(RejectReason::TooFewCorners {
            found: detection.charuco_ids.len(),
            required: min_corners,
        });
    }
    let corner_count = board.corner_count();
    if let Some(&id) = detection
        .charuco_ids
        .iter()
        .find(|&&id| id < 0 || id as usize >= corner_count)
    {
        return Err(RejectReason::CornerIdOutOfRange(id));
    }
    let marker_count = board.marker_count();
    if let Some(&id) = detection
        .marker_ids
        .iter()
        .find(|&&id| id < 0 || id as usize >= marker_count)
    {
        return Err(RejectReason::MarkerIdOutOfRange(id));
    }
    Ok(())
}

/// Per-frame corner observations in a fixed layout of `corner_count` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBoard {
    cells: Vec<Option<[f64; 2]>>,
}

impl ObservationBoard {
    /// Scatter a filtered detection into its cells. Later duplicates win.
    pub fn from_detection(detection: &BoardDetection, board: &CharucoBoard) -> Self {
        let mut cells = vec![None; board.corner_count()];
        for (&id, corner) in detection
            .charuco_ids
            .iter()
            .zip(detection.charuco_corners.iter())
        {
            if let Some(cell) = usize::try_from(id).ok().and_then(|id| cells.get_mut(id)) {
                *cell = Some(*corner);
            }
        }
        Self { cells }
    }

    /// Observed pixel of cell `k`.
    pub fn cell(&self, k: usize) -> Option<[f64; 2]> {
        self.cells.get(k).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of observed cells.
    pub fn observed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Observed cells as `(cell index, pixel)`.
    pub fn observed(&self) -> impl Iterator<Item = (usize, [f64; 2])> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(k, c)| c.map(|uv| (k, uv)))
    }

    /// Drop the observation in cell `k`.
    pub fn clear(&mut self, k: usize) {
        if let Some(cell) = self.cells.get_mut(k) {
            *cell = None;
        }
    }

    /// External layout: `(u, v, 1)` per observed cell, `(-1, -1, -1)` otherwise.
    pub fn to_points3(&self) -> Vec<[f64; 3]> {
        self.cells
            .iter()
            .map(|c| match c {
                Some([u, v]) => [*u, *v, 1.0],
                None => [-1.0, -1.0, -1.0],
            })
            .collect()
    }
}
