use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use wpical_camera::{
    filter_detection, BoardDetection, BoardDetector, CalibrationFailure, CameraCalibrationConfig,
    CameraCalibrator, CharucoBoard, ObservationBoard, MIN_BOARD_VIEWS,
};
use wpical_io::{GrayFrame, MemorySource};

const WIDTH: usize = 1920;
const HEIGHT: usize = 1080;

/// Replays precomputed detections by frame index.
struct ReplayDetector {
    detections: Vec<Option<BoardDetection>>,
    delay: Duration,
}

impl BoardDetector for ReplayDetector {
    fn detect(&self, frame: &GrayFrame) -> Option<BoardDetection> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.detections.get(frame.index).cloned().flatten()
    }
}

fn board_pose(i: usize, board: &CharucoBoard) -> Isometry3<f64> {
    let f = i as f64;
    let center = Vector3::new(
        (board.width - 2) as f64 * board.square_length_m / 2.0,
        (board.height - 2) as f64 * board.square_length_m / 2.0,
        0.0,
    );
    let rotation = UnitQuaternion::from_euler_angles(
        0.45 * (1.3 * f).sin(),
        0.45 * (0.7 * f + 0.4).cos(),
        0.2 * (0.5 * f).sin(),
    );
    let t = Vector3::new(0.05 * (0.9 * f).sin(), 0.03 * (1.1 * f).cos(), 0.4 + 0.01 * f);
    Isometry3::from_parts(Translation3::from(t), rotation) * Translation3::from(-center)
}

/// Project the inner corners of `board` through a zero-distortion camera,
/// rounding to whole pixels.
fn synthetic_detections(board: &CharucoBoard, frames: usize) -> Vec<Option<BoardDetection>> {
    let (fx, fy, cx, cy) = (1000.0, 1000.0, 960.0, 540.0);
    (0..frames)
        .map(|i| {
            let pose = board_pose(i, board);
            let mut detection = BoardDetection {
                marker_ids: (0..board.marker_count() as i32).collect(),
                ..Default::default()
            };
            for (id, p) in board.object_points().iter().enumerate() {
                let pc = pose * Point3::new(p[0], p[1], p[2]);
                let u = (fx * pc.x / pc.z + cx).round();
                let v = (fy * pc.y / pc.z + cy).round();
                if pc.z > 0.0 && (0.0..WIDTH as f64).contains(&u) && (0.0..HEIGHT as f64).contains(&v)
                {
                    detection.charuco_ids.push(id as i32);
                    detection.charuco_corners.push([u, v]);
                }
            }
            Some(detection)
        })
        .collect()
}

fn wait_until_finished(calibrator: &CameraCalibrator) {
    let start = Instant::now();
    while !calibrator.is_finished() {
        assert!(start.elapsed() < Duration::from_secs(300), "calibration timed out");
        thread::sleep(Duration::from_millis(10));
    }
}

fn run(num_workers: usize, frames: usize) -> CameraCalibrator {
    let board = CameraCalibrationConfig::default().board().unwrap();
    run_detections(num_workers, synthetic_detections(&board, frames))
}

fn run_detections(
    num_workers: usize,
    detections: Vec<Option<BoardDetection>>,
) -> CameraCalibrator {
    let config = CameraCalibrationConfig {
        num_workers,
        ..CameraCalibrationConfig::default()
    };
    let frames = detections.len();
    let detector = Arc::new(ReplayDetector {
        detections,
        delay: Duration::ZERO,
    });
    let source = Box::new(MemorySource::blank(WIDTH, HEIGHT, frames));
    let calibrator = CameraCalibrator::start(source, config, detector);
    wait_until_finished(&calibrator);
    calibrator
}

#[test]
fn test_twenty_frame_board_recovers_intrinsics() {
    let calibrator = run(4, 20);
    assert_eq!(calibrator.failure(), None);
    assert_eq!(calibrator.total_frames(), 20);
    assert_eq!(calibrator.frames_processed(), 20);

    let model = calibrator.camera_model().unwrap();
    assert!(model.is_set());
    assert_relative_eq!(model.fx(), 1000.0, max_relative = 0.01);
    assert_relative_eq!(model.fy(), 1000.0, max_relative = 0.01);
    assert_relative_eq!(model.cx(), 960.0, max_relative = 0.01);
    assert_relative_eq!(model.cy(), 540.0, max_relative = 0.01);
    assert!(model.avg_reprojection_error < 1.0);
}

#[test]
fn test_worker_count_does_not_change_solution() {
    let single = run(1, 12).camera_model().unwrap();
    let many = run(6, 12).camera_model().unwrap();
    for (a, b) in single
        .intrinsic_matrix
        .iter()
        .flatten()
        .zip(many.intrinsic_matrix.iter().flatten())
    {
        assert_relative_eq!(*a, *b, epsilon = 1e-6, max_relative = 1e-9);
    }
    assert_relative_eq!(
        single.avg_reprojection_error,
        many.avg_reprojection_error,
        epsilon = 1e-9
    );
}

#[test]
fn test_stop_is_terminal() {
    let config = CameraCalibrationConfig {
        num_workers: 2,
        ..CameraCalibrationConfig::default()
    };
    let detector = Arc::new(ReplayDetector {
        detections: Vec::new(),
        delay: Duration::from_millis(5),
    });
    let source = Box::new(MemorySource::blank(64, 48, 10_000));
    let calibrator = CameraCalibrator::start(source, config, detector);

    calibrator.stop();
    assert!(calibrator.is_finished());
    assert_eq!(calibrator.camera_model(), None);
    assert_eq!(calibrator.failure(), Some(CalibrationFailure::Cancelled));

    let start = Instant::now();
    drop(calibrator);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_missing_video_finishes_immediately() {
    let detector = Arc::new(ReplayDetector {
        detections: Vec::new(),
        delay: Duration::ZERO,
    });
    let calibrator = CameraCalibrator::new(
        "/definitely/not/here/board.mp4",
        CameraCalibrationConfig::default(),
        detector,
    );
    assert!(calibrator.is_finished());
    assert_eq!(calibrator.camera_model(), None);
    assert!(matches!(
        calibrator.failure(),
        Some(CalibrationFailure::NoVideoFound(_))
    ));
}

#[test]
fn test_no_detections_gives_no_model() {
    let detector = Arc::new(ReplayDetector {
        detections: Vec::new(),
        delay: Duration::ZERO,
    });
    let source = Box::new(MemorySource::blank(64, 48, 30));
    let calibrator = CameraCalibrator::start(source, CameraCalibrationConfig::default(), detector);
    wait_until_finished(&calibrator);
    assert_eq!(calibrator.frames_processed(), 30);
    assert_eq!(calibrator.camera_model(), None);
    assert!(matches!(
        calibrator.failure(),
        Some(CalibrationFailure::InsufficientObservations(_))
    ));
}

/// Corner ids hidden in frame `i`: every third id, plus board row 3 in even frames.
fn hidden(board: &CharucoBoard, i: usize, id: usize) -> bool {
    let cols = board.width - 1;
    id % 3 == 0 || (i % 2 == 0 && id / cols == 3)
}

#[test]
fn test_partial_detections_are_excluded_from_the_solve() {
    let board = CameraCalibrationConfig::default().board().unwrap();
    let mut detections = synthetic_detections(&board, 20);
    for (i, detection) in detections.iter_mut().flatten().enumerate() {
        assert_eq!(detection.charuco_ids.len(), board.corner_count());
        let (ids, corners): (Vec<i32>, Vec<[f64; 2]>) = detection
            .charuco_ids
            .iter()
            .zip(&detection.charuco_corners)
            .filter(|&(&id, _)| !hidden(&board, i, id as usize))
            .map(|(&id, &corner)| (id, corner))
            .unzip();
        detection.charuco_ids = ids;
        detection.charuco_corners = corners;
        assert_eq!(filter_detection(detection, &board, 10), Ok(()));

        let points = ObservationBoard::from_detection(detection, &board).to_points3();
        for (id, p) in points.iter().enumerate() {
            assert_eq!(*p == [-1.0, -1.0, -1.0], hidden(&board, i, id), "frame {i} id {id}");
        }
    }

    let calibrator = run_detections(3, detections);
    assert_eq!(calibrator.failure(), None);
    let model = calibrator.camera_model().unwrap();
    assert_relative_eq!(model.fx(), 1000.0, max_relative = 0.01);
    assert_relative_eq!(model.fy(), 1000.0, max_relative = 0.01);
    assert_relative_eq!(model.cx(), 960.0, max_relative = 0.01);
    assert_relative_eq!(model.cy(), 540.0, max_relative = 0.01);
    assert!(model.avg_reprojection_error < 1.0);
}

#[test]
fn test_fewer_than_minimum_views_gives_no_model() {
    let calibrator = run(2, MIN_BOARD_VIEWS - 1);
    assert_eq!(calibrator.frames_processed(), MIN_BOARD_VIEWS - 1);
    assert_eq!(calibrator.camera_model(), None);
    match calibrator.failure() {
        Some(CalibrationFailure::InsufficientObservations(reason)) => {
            assert!(reason.contains("need at least 3"), "{reason}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
