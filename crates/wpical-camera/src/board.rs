use thiserror::Error;

/// Meters per inch.
pub const METERS_PER_INCH: f64 = 0.0254;

/// Invalid ChArUco board geometry.
#[derive(Debug, Error, PartialEq)]
pub enum BoardError {
    /// A board needs at least 2x2 squares to have an inner corner.
    #[error("board must be at least 2x2 squares, got {width}x{height}")]
    TooSmall {
        /// Squares along x.
        width: usize,
        /// Squares along y.
        height: usize,
    },

    /// Square and marker sizes must be positive, with the marker inside the square.
    #[error("invalid square/marker lengths {square} / {marker}")]
    InvalidLengths {
        /// Square side in meters.
        square: f64,
        /// Marker side in meters.
        marker: f64,
    },
}

/// Geometry of a ChArUco board.
///
/// Inner chessboard corners are numbered row by row: corner `id` sits at row
/// `i = id / (width - 1)`, column `j = id % (width - 1)`, and lies at
/// `(j * s, i * s, 0)` in the board frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharucoBoard {
    /// Squares along x.
    pub width: usize,
    /// Squares along y.
    pub height: usize,
    /// Chessboard square side in meters.
    pub square_length_m: f64,
    /// ArUco marker side in meters.
    pub marker_length_m: f64,
}

impl CharucoBoard {
    pub fn new(
        width: usize,
        height: usize,
        square_length_m: f64,
        marker_length_m: f64,
    ) -> Result<Self, BoardError> {
        if width < 2 || height < 2 {
            return Err(BoardError::TooSmall { width, height });
        }
        if !(square_length_m > 0.0 && marker_length_m > 0.0 && marker_length_m < square_length_m)
        {
            return Err(BoardError::InvalidLengths {
                square: square_length_m,
                marker: marker_length_m,
            });
        }
        Ok(Self {
            width,
            height,
            square_length_m,
            marker_length_m,
        })
    }

    /// Board with square and marker sides given in inches.
    pub fn from_inches(
        width: usize,
        height: usize,
        square_length_in: f64,
        marker_length_in: f64,
    ) -> Result<Self, BoardError> {
        Self::new(
            width,
            height,
            square_length_in * METERS_PER_INCH,
            marker_length_in * METERS_PER_INCH,
        )
    }

    /// Number of inner corners, `(w - 1) * (h - 1)`.
    pub fn corner_count(&self) -> usize {
        (self.width - 1) * (self.height - 1)
    }

    /// Number of markers, `floor(w * h / 2)`.
    pub fn marker_count(&self) -> usize {
        self.width * self.height / 2
    }

    /// Board-frame position of corner `id`, `None` when out of range.
    pub fn object_point(&self, id: usize) -> Option<[f64; 3]> {
        if id >= self.corner_count() {
            return None;
        }
        let cols = self.width - 1;
        let (i, j) = (id / cols, id % cols);
        Some([
            j as f64 * self.square_length_m,
            i as f64 * self.square_length_m,
            0.0,
        ])
    }

    /// Board-frame positions of every corner in id order.
    pub fn object_points(&self) -> Vec<[f64; 3]> {
        (0..self.corner_count())
            .filter_map(|id| self.object_point(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_counts() -> Result<(), BoardError> {
        let board = CharucoBoard::from_inches(12, 8, 0.709, 0.551)?;
        assert_eq!(board.corner_count(), 77);
        assert_eq!(board.marker_count(), 48);
        assert_relative_eq!(board.square_length_m, 0.709 * 0.0254);

        let odd = CharucoBoard::new(5, 7, 0.04, 0.03)?;
        assert_eq!(odd.marker_count(), 17);
        Ok(())
    }

    #[test]
    fn test_object_point_layout() -> Result<(), BoardError> {
        let board = CharucoBoard::new(12, 8, 0.02, 0.015)?;
        assert_eq!(board.object_point(0), Some([0.0, 0.0, 0.0]));
        let p = board.object_point(12).unwrap_or_default();
        assert_relative_eq!(p[0], 0.02);
        assert_relative_eq!(p[1], 0.02);
        let last = board.object_point(76).unwrap_or_default();
        assert_relative_eq!(last[0], 10.0 * 0.02);
        assert_relative_eq!(last[1], 6.0 * 0.02);
        assert_eq!(board.object_point(77), None);
        assert_eq!(board.object_points().len(), 77);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert_eq!(
            CharucoBoard::new(1, 8, 0.02, 0.01),
            Err(BoardError::TooSmall {
                width: 1,
                height: 8
            })
        );
        assert!(matches!(
            CharucoBoard::new(12, 8, 0.01, 0.02),
            Err(BoardError::InvalidLengths { .. })
        ));
    }
}
