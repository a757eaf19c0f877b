use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use wpical_camera::{CalibrationFailure, CameraModel, CancelToken};
use wpical_io::{list_video_inputs, DefaultOpener, SourceOpener};
use wpical_layout::{AprilTag, AprilTagFieldLayout};
use wpical_pnp::PinholeCamera;

use crate::config::FieldCalibrationConfig;
use crate::detection::TagDetector;
use crate::error::FieldError;
use crate::graph::{FrameTags, PoseGraph, TagObservation};
use crate::tag_pose::estimate_tag_pose;

/// Lifecycle of a [`FieldCalibrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCalibrationState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// Non-fatal findings of a field calibration.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWarning {
    /// The solved layout holds a different number of tags than the ideal one.
    TagCountMismatch {
        /// Tags in the solved layout.
        calibrated: usize,
        /// Tags in the ideal layout.
        ideal: usize,
    },
    /// A tag was seen but never together with the pinned tag's component.
    UnconnectedTag(i32),
    /// A tag was calibrated that the ideal layout does not hold.
    TagNotInIdealLayout(i32),
    /// An input could not be read and was skipped.
    SkippedInput {
        /// The skipped video.
        path: PathBuf,
        /// Why it was skipped.
        reason: String,
    },
}

#[derive(Default)]
struct Shared {
    cancel: CancelToken,
    finished: AtomicBool,
    outcome: OnceLock<Result<AprilTagFieldLayout, CalibrationFailure>>,
    warnings: Mutex<Vec<FieldWarning>>,
}

impl Shared {
    fn warn(&self, warning: FieldWarning) {
        log::warn!("{warning:?}");
        match self.warnings.lock() {
            Ok(mut warnings) => warnings.push(warning),
            Err(poisoned) => poisoned.into_inner().push(warning),
        }
    }
}

/// Inputs of one run, moved to the background thread.
struct FieldJob {
    input_dir: PathBuf,
    camera_model: CameraModel,
    ideal: AprilTagFieldLayout,
    pinned_tag_id: i32,
    show_debug: bool,
    config: FieldCalibrationConfig,
    detector: Arc<dyn TagDetector>,
    opener: Arc<dyn SourceOpener>,
}

/// AprilTag field layout calibration running on a background thread.
///
/// `NotStarted -> Running -> Succeeded | Failed`. Only the first call to
/// [`FieldCalibrator::calibrate`] starts a run.
///
/// Every observed tag ID is calibrated; the FRC range `1..=max_frc_tag` only
/// restricts the pinned tag. Frames seeing a single tag add no geometry, so a
/// pinned tag that never shares a frame with another tag fails the run with
/// [`CalibrationFailure::PinnedTagIsolated`], while one never seen at all
/// fails with [`CalibrationFailure::PinnedTagNotObserved`].
pub struct FieldCalibrator {
    config: FieldCalibrationConfig,
    detector: Arc<dyn TagDetector>,
    opener: Arc<dyn SourceOpener>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl FieldCalibrator {
    pub fn new(config: FieldCalibrationConfig, detector: Arc<dyn TagDetector>) -> Self {
        Self::with_opener(config, detector, Arc::new(DefaultOpener))
    }

    pub fn with_opener(
        config: FieldCalibrationConfig,
        detector: Arc<dyn TagDetector>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        Self {
            config,
            detector,
            opener,
            shared: Arc::new(Shared::default()),
            handle: None,
            started: false,
        }
    }

    /// Start calibrating the videos in `input_dir`. Returns immediately.
    ///
    /// Returns `false`, doing nothing, if a run was already started.
    pub fn calibrate(
        &mut self,
        input_dir: impl AsRef<Path>,
        camera_model: &CameraModel,
        ideal: &AprilTagFieldLayout,
        pinned_tag_id: i32,
        show_debug: bool,
    ) -> bool {
        if self.started {
            log::warn!("field calibration already started, ignoring");
            return false;
        }
        self.started = true;

        let job = FieldJob {
            input_dir: input_dir.as_ref().to_path_buf(),
            camera_model: camera_model.clone(),
            ideal: ideal.clone(),
            pinned_tag_id,
            show_debug,
            config: self.config.clone(),
            detector: self.detector.clone(),
            opener: self.opener.clone(),
        };
        let shared = self.shared.clone();
        self.handle = Some(thread::spawn(move || {
            let outcome = job.run(&shared);
            if let Err(failure) = &outcome {
                log::error!("field calibration failed: {failure}");
            }
            let _ = shared.outcome.set(outcome);
            shared.finished.store(true, Ordering::SeqCst);
        }));
        true
    }

    pub fn state(&self) -> FieldCalibrationState {
        if !self.started {
            return FieldCalibrationState::NotStarted;
        }
        if !self.shared.finished.load(Ordering::SeqCst) {
            return FieldCalibrationState::Running;
        }
        match self.shared.outcome.get() {
            Some(Ok(_)) => FieldCalibrationState::Succeeded,
            _ => FieldCalibrationState::Failed,
        }
    }

    /// The background run has completed, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// The calibrated layout after a successful run.
    pub fn field_layout(&self) -> Option<AprilTagFieldLayout> {
        if !self.is_finished() {
            return None;
        }
        match self.shared.outcome.get() {
            Some(Ok(layout)) => Some(layout.clone()),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<CalibrationFailure> {
        if !self.is_finished() {
            return None;
        }
        match self.shared.outcome.get() {
            Some(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Warnings raised so far.
    pub fn warnings(&self) -> Vec<FieldWarning> {
        match self.shared.warnings.lock() {
            Ok(warnings) => warnings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Cancel a running calibration.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }
}

impl Drop for FieldCalibrator {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("field calibration thread panicked");
            }
        }
    }
}

impl FieldJob {
    fn run(&self, shared: &Shared) -> Result<AprilTagFieldLayout, CalibrationFailure> {
        let max = self.config.max_frc_tag;
        let pinned = self.pinned_tag_id;
        if !self.camera_model.is_set() {
            return Err(CalibrationFailure::InvalidCameraModel(
                "camera model has no calibration".to_string(),
            ));
        }
        if self.ideal.is_empty() {
            return Err(CalibrationFailure::InvalidIdealLayout(
                "ideal layout has no tags".to_string(),
            ));
        }
        if !(1..=max).contains(&pinned) {
            return Err(CalibrationFailure::PinnedTagOutOfRange { id: pinned, max });
        }
        let pinned_pose = self
            .ideal
            .get_tag_pose(pinned)
            .ok_or(CalibrationFailure::PinnedTagNotInIdealLayout(pinned))?;

        let inputs = list_video_inputs(&self.input_dir)
            .map_err(|e| CalibrationFailure::NoVideoFound(e.to_string()))?;
        if inputs.is_empty() {
            return Err(CalibrationFailure::NoVideoFound(format!(
                "no videos in {}",
                self.input_dir.display()
            )));
        }

        let camera = self.camera_model.to_pinhole();
        let mut frames = Vec::new();
        for (video, path) in inputs.iter().enumerate() {
            frames.extend(self.observe_video(video, path, &camera, shared)?);
        }
        log::info!("{} frames with tags across {} videos", frames.len(), inputs.len());
        if !frames
            .iter()
            .any(|frame| frame.tags.iter().any(|t| t.tag_id == pinned))
        {
            return Err(CalibrationFailure::PinnedTagNotObserved(pinned));
        }

        let mut graph = PoseGraph::build(frames, camera, self.config.tag_size_m);
        // seen, so only single-tag frames held it
        let unconnected = graph.initialize(pinned, pinned_pose).map_err(|err| match err {
            FieldError::PinnedTagNotObserved(id) => CalibrationFailure::PinnedTagIsolated(id),
            err => field_failure(err),
        })?;
        for id in unconnected {
            shared.warn(FieldWarning::UnconnectedTag(id));
        }
        let poses = graph
            .solve(
                pinned,
                self.config.max_iterations,
                self.config.huber_delta_px,
                &shared.cancel,
            )
            .map_err(field_failure)?;

        let layout = AprilTagFieldLayout::new(
            poses.into_iter().map(|(id, pose)| AprilTag::new(id, pose)),
            self.ideal.field_length(),
            self.ideal.field_width(),
        )
        .map_err(|e| CalibrationFailure::SolveDidNotConverge(e.to_string()))?;

        for id in layout.tag_ids() {
            if self.ideal.tag(id).is_none() {
                shared.warn(FieldWarning::TagNotInIdealLayout(id));
            }
        }
        if layout.len() != self.ideal.len() {
            shared.warn(FieldWarning::TagCountMismatch {
                calibrated: layout.len(),
                ideal: self.ideal.len(),
            });
        }
        Ok(layout)
    }

    /// Detect tags in every sampled frame of one video.
    fn observe_video(
        &self,
        video: usize,
        path: &Path,
        camera: &PinholeCamera,
        shared: &Shared,
    ) -> Result<Vec<FrameTags>, CalibrationFailure> {
        let mut source = match self.opener.open(path) {
            Ok(source) => source,
            Err(err) => {
                shared.warn(FieldWarning::SkippedInput {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                });
                return Ok(Vec::new());
            }
        };
        log::info!("processing {}", path.display());

        let stride = self.config.frame_stride.max(1);
        let mut frames = Vec::new();
        loop {
            if shared.cancel.is_cancelled() {
                return Err(CalibrationFailure::Cancelled);
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    shared.warn(FieldWarning::SkippedInput {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    });
                    break;
                }
            };
            if frame.index % stride != 0 {
                continue;
            }

            let tags: Vec<TagObservation> = self
                .detector
                .detect(&frame)
                .into_iter()
                .filter_map(|det| {
                    match estimate_tag_pose(&det.corners, camera, self.config.tag_size_m) {
                        Ok(camera_from_tag) => Some(TagObservation {
                            tag_id: det.id,
                            corners: det.corners,
                            camera_from_tag,
                        }),
                        Err(err) => {
                            log::debug!("frame {}: tag {} has no pose ({err})", frame.index, det.id);
                            None
                        }
                    }
                })
                .collect();

            if self.show_debug {
                let ids: Vec<i32> = tags.iter().map(|t| t.tag_id).collect();
                log::info!("video {video} frame {}: tags {ids:?}", frame.index);
            }
            if !tags.is_empty() {
                frames.push(FrameTags {
                    video,
                    frame_index: frame.index,
                    tags,
                });
            }
        }
        Ok(frames)
    }
}

fn field_failure(err: FieldError) -> CalibrationFailure {
    match err {
        FieldError::PinnedTagNotObserved(id) => CalibrationFailure::PinnedTagNotObserved(id),
        FieldError::Cancelled => CalibrationFailure::Cancelled,
        FieldError::Optimizer(err) => CalibrationFailure::SolveDidNotConverge(err.to_string()),
    }
}
