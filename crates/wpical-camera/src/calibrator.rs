use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use wpical_io::{DefaultOpener, FrameSource, GrayFrame, SourceOpener};
use wpical_pnp::{CameraIntrinsics, PinholeCamera};

use crate::board::CharucoBoard;
use crate::cancel::CancelToken;
use crate::config::CameraCalibrationConfig;
use crate::detection::{filter_detection, BoardDetector, ObservationBoard};
use crate::failure::CalibrationFailure;
use crate::intrinsics::{calibrate_intrinsics, principal_point_seed, FrameObservation};
use crate::model::CameraModel;

/// State shared between the calibrator handle and its threads.
#[derive(Default)]
struct Shared {
    cancel: CancelToken,
    finished: AtomicBool,
    total_frames: AtomicUsize,
    frames_processed: AtomicUsize,
    outcome: OnceLock<Result<CameraModel, CalibrationFailure>>,
}

impl Shared {
    fn finish(&self, outcome: Result<CameraModel, CalibrationFailure>) {
        if let Err(failure) = &outcome {
            log::warn!("camera calibration failed: {failure}");
        }
        let _ = self.outcome.set(outcome);
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Camera intrinsics calibration running in the background.
///
/// A decoder thread feeds frames through a bounded channel to a pool of
/// detection workers. A coordinator thread joins them and runs the batched
/// solve. The handle only reads atomics; dropping it cancels and joins.
pub struct CameraCalibrator {
    shared: Arc<Shared>,
    coordinator: Option<JoinHandle<()>>,
}

impl CameraCalibrator {
    /// Calibrate from the video at `path`, opened with [`DefaultOpener`].
    ///
    /// Never fails: if the video cannot be opened the calibrator is finished
    /// right away with [`CalibrationFailure::NoVideoFound`].
    pub fn new(
        path: impl AsRef<Path>,
        config: CameraCalibrationConfig,
        detector: Arc<dyn BoardDetector>,
    ) -> Self {
        Self::with_opener(path, &DefaultOpener, config, detector)
    }

    /// Same as [`CameraCalibrator::new`] with a custom opener.
    pub fn with_opener(
        path: impl AsRef<Path>,
        opener: &dyn SourceOpener,
        config: CameraCalibrationConfig,
        detector: Arc<dyn BoardDetector>,
    ) -> Self {
        let path = path.as_ref();
        match opener.open(path) {
            Ok(source) => Self::start(source, config, detector),
            Err(err) => Self::failed(CalibrationFailure::NoVideoFound(format!(
                "{}: {err}",
                path.display()
            ))),
        }
    }

    /// Calibrate from an already opened frame source.
    pub fn start(
        source: Box<dyn FrameSource>,
        config: CameraCalibrationConfig,
        detector: Arc<dyn BoardDetector>,
    ) -> Self {
        let board = match config.board() {
            Ok(board) => board,
            Err(err) => {
                return Self::failed(CalibrationFailure::InsufficientObservations(
                    err.to_string(),
                ))
            }
        };

        let shared = Arc::new(Shared::default());
        if let Some(total) = source.total_frames() {
            shared.total_frames.store(total, Ordering::SeqCst);
        }
        let image_size = source.frame_size();
        let num_workers = config.num_workers.max(1);
        log::info!(
            "calibrating {}x{} video with {num_workers} workers, board {}x{}",
            image_size.0,
            image_size.1,
            board.width,
            board.height
        );

        let (tx, rx) = mpsc::sync_channel::<GrayFrame>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let decoder = {
            let shared = shared.clone();
            thread::spawn(move || decode_frames(source, tx, &shared))
        };

        let workers: Vec<JoinHandle<Vec<FrameObservation>>> = (0..num_workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let shared = shared.clone();
                let detector = detector.clone();
                let min_corners = config.min_corners;
                thread::spawn(move || {
                    detect_frames(worker_id, &rx, detector.as_ref(), &board, min_corners, &shared)
                })
            })
            .collect();
        drop(rx);

        let coordinator = {
            let shared = shared.clone();
            let max_iterations = config.max_iterations;
            thread::spawn(move || {
                let outcome = coordinate(
                    decoder,
                    workers,
                    &board,
                    image_size,
                    max_iterations,
                    &shared,
                );
                shared.finish(outcome);
            })
        };

        Self {
            shared,
            coordinator: Some(coordinator),
        }
    }

    fn failed(failure: CalibrationFailure) -> Self {
        let shared = Arc::new(Shared::default());
        shared.finish(Err(failure));
        Self {
            shared,
            coordinator: None,
        }
    }

    /// Done decoding, detecting and solving, or stopped.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst) || self.shared.cancel.is_cancelled()
    }

    /// The solved model, once a solve succeeded and the run was not stopped.
    pub fn camera_model(&self) -> Option<CameraModel> {
        if self.shared.cancel.is_cancelled() {
            return None;
        }
        match self.shared.outcome.get() {
            Some(Ok(model)) => Some(model.clone()),
            _ => None,
        }
    }

    /// Why the run produced no model, if it is over and did not succeed.
    pub fn failure(&self) -> Option<CalibrationFailure> {
        if self.shared.cancel.is_cancelled() {
            return Some(CalibrationFailure::Cancelled);
        }
        match self.shared.outcome.get() {
            Some(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Frame count from the video metadata, or frames decoded so far.
    pub fn total_frames(&self) -> usize {
        self.shared.total_frames.load(Ordering::SeqCst)
    }

    pub fn frames_processed(&self) -> usize {
        self.shared.frames_processed.load(Ordering::SeqCst)
    }

    /// Cancel the run. Background threads exit at their next check.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    /// Token that cancels this run when triggered.
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }
}

impl Drop for CameraCalibrator {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.coordinator.take() {
            if handle.join().is_err() {
                log::error!("camera calibration coordinator panicked");
            }
        }
    }
}

fn decode_frames(mut source: Box<dyn FrameSource>, tx: SyncSender<GrayFrame>, shared: &Shared) {
    let counted = shared.total_frames.load(Ordering::SeqCst) == 0;
    while !shared.cancel.is_cancelled() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                if counted {
                    shared.total_frames.fetch_add(1, Ordering::SeqCst);
                }
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("stopped decoding: {err}");
                break;
            }
        }
    }
}

fn detect_frames(
    worker_id: usize,
    rx: &Mutex<Receiver<GrayFrame>>,
    detector: &dyn BoardDetector,
    board: &CharucoBoard,
    min_corners: usize,
    shared: &Shared,
) -> Vec<FrameObservation> {
    let mut observations = Vec::new();
    let mut provisional: Option<PinholeCamera> = None;

    while !shared.cancel.is_cancelled() {
        let frame = {
            let guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.recv() {
                Ok(frame) => frame,
                Err(_) => break,
            }
        };

        let camera = provisional.get_or_insert_with(|| {
            let (cx, cy) = principal_point_seed(frame.size());
            let f = frame.width as f64;
            PinholeCamera::pinhole(CameraIntrinsics::new(f, f, cx, cy))
        });

        if let Some(detection) = detector.detect(&frame) {
            match filter_detection(&detection, board, min_corners) {
                Ok(()) => {
                    let cells = ObservationBoard::from_detection(&detection, board);
                    if let Some(obs) =
                        FrameObservation::from_board(frame.index, cells, board, camera)
                    {
                        observations.push(obs);
                    }
                }
                Err(reason) => log::debug!("frame {} rejected: {reason:?}", frame.index),
            }
        }
        shared.frames_processed.fetch_add(1, Ordering::SeqCst);
    }

    log::debug!("worker {worker_id} kept {} views", observations.len());
    observations
}

fn coordinate(
    decoder: JoinHandle<()>,
    workers: Vec<JoinHandle<Vec<FrameObservation>>>,
    board: &CharucoBoard,
    image_size: (usize, usize),
    max_iterations: usize,
    shared: &Shared,
) -> Result<CameraModel, CalibrationFailure> {
    if decoder.join().is_err() {
        log::error!("frame decoder panicked");
    }
    let mut observations = Vec::new();
    for worker in workers {
        match worker.join() {
            Ok(views) => observations.extend(views),
            Err(_) => log::error!("detection worker panicked"),
        }
    }
    if shared.cancel.is_cancelled() {
        return Err(CalibrationFailure::Cancelled);
    }

    // workers finish in any order
    observations.sort_by_key(|o| o.frame_index);
    log::info!(
        "{} of {} frames have a usable board",
        observations.len(),
        shared.frames_processed.load(Ordering::SeqCst)
    );
    if observations.is_empty() {
        return Err(CalibrationFailure::InsufficientObservations(
            "no frame contained a usable board".to_string(),
        ));
    }

    calibrate_intrinsics(
        &observations,
        board,
        image_size,
        max_iterations,
        &shared.cancel,
    )
    .map(|solution| solution.model)
}
