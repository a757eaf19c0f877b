//! ChArUco detection through OpenCV's `objdetect` module.

use std::sync::Mutex;

use opencv::core::{Mat, Point2f, Size, Vector};
use opencv::objdetect::{self, CharucoDetectorTraitConst, PredefinedDictionaryType};
use opencv::prelude::*;
use wpical_io::GrayFrame;

use crate::board::CharucoBoard;
use crate::detection::{BoardDetection, BoardDetector};

/// ChArUco detector on the `DICT_5X5_1000` dictionary.
///
/// OpenCV detectors are not shareable across threads, so each worker borrows
/// one from a small pool.
pub struct OpenCvCharucoDetector {
    board: CharucoBoard,
    pool: Mutex<Vec<objdetect::CharucoDetector>>,
}

impl OpenCvCharucoDetector {
    pub fn new(board: CharucoBoard) -> opencv::Result<Self> {
        let detector = build_detector(&board)?;
        Ok(Self {
            board,
            pool: Mutex::new(vec![detector]),
        })
    }

    fn checkout(&self) -> opencv::Result<objdetect::CharucoDetector> {
        let pooled = match self.pool.lock() {
            Ok(mut pool) => pool.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        match pooled {
            Some(detector) => Ok(detector),
            None => build_detector(&self.board),
        }
    }

    fn checkin(&self, detector: objdetect::CharucoDetector) {
        match self.pool.lock() {
            Ok(mut pool) => pool.push(detector),
            Err(poisoned) => poisoned.into_inner().push(detector),
        }
    }

    fn run(
        &self,
        detector: &objdetect::CharucoDetector,
        frame: &GrayFrame,
    ) -> opencv::Result<BoardDetection> {
        let image = Mat::new_rows_cols_with_data(frame.height as i32, frame.width as i32, &frame.data)?;

        let mut charuco_corners = Vector::<Point2f>::new();
        let mut charuco_ids = Vector::<i32>::new();
        let mut marker_corners = Vector::<Vector<Point2f>>::new();
        let mut marker_ids = Vector::<i32>::new();
        detector.detect_board(
            &image,
            &mut charuco_corners,
            &mut charuco_ids,
            &mut marker_corners,
            &mut marker_ids,
        )?;

        Ok(BoardDetection {
            charuco_ids: charuco_ids.to_vec(),
            charuco_corners: charuco_corners
                .iter()
                .map(|p| [p.x as f64, p.y as f64])
                .collect(),
            marker_ids: marker_ids.to_vec(),
        })
    }
}

impl BoardDetector for OpenCvCharucoDetector {
    fn detect(&self, frame: &GrayFrame) -> Option<BoardDetection> {
        let detector = match self.checkout() {
            Ok(detector) => detector,
            Err(err) => {
                log::error!("cannot create ChArUco detector: {err}");
                return None;
            }
        };
        let result = self.run(&detector, frame);
        self.checkin(detector);
        match result {
            Ok(detection) if !detection.charuco_ids.is_empty() => Some(detection),
            Ok(_) => None,
            Err(err) => {
                log::debug!("frame {}: ChArUco detection failed: {err}", frame.index);
                None
            }
        }
    }
}

fn build_detector(board: &CharucoBoard) -> opencv::Result<objdetect::CharucoDetector> {
    let dictionary = objdetect::get_predefined_dictionary(PredefinedDictionaryType::DICT_5X5_1000)?;
    let cv_board = objdetect::CharucoBoard::new_def(
        Size::new(board.width as i32, board.height as i32),
        board.square_length_m as f32,
        board.marker_length_m as f32,
        &dictionary,
    )?;
    objdetect::CharucoDetector::new_def(&cv_board)
}
