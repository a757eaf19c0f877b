//! Batched intrinsics solve over every accepted board view.
//!
//! The problem has one `intrinsics` block (`fx, fy, cx, cy`), one `distortion`
//! block (8 OpenCV coefficients) and one SE(3) pose per frame. Frame poses are
//! marginalized, so each LM iteration only factors a 12x12 system.
//!
//! The solve runs in stages, sharing one iteration budget:
//!
//! 1. frame poses only, intrinsics at the seed and no distortion;
//! 2. core intrinsics and poses, distortion still zero;
//! 3. everything, distortion seeded with tiny random values, then corners
//!    reprojecting worse than `max(3 * rms, 1px)` are dropped;
//! 4. everything again on the inliers.

use nalgebra::{Isometry3, Matrix3, Point3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use wpical_optim::{
    isometry_from_params, isometry_to_params, numeric_linearize, Factor, FactorError,
    FactorResult, LevenbergMarquardt, LinearizationResult, OptimizerError, Problem, Variable,
    VariableType,
};
use wpical_pnp::{
    decompose_plane_homography, dlt_homography, focal_from_homographies, solve_planar_pnp,
    CameraIntrinsics, LMParams, PinholeCamera, PolynomialDistortion,
};

use crate::board::CharucoBoard;
use crate::cancel::CancelToken;
use crate::detection::ObservationBoard;
use crate::failure::CalibrationFailure;
use crate::model::CameraModel;

const INTRINSICS: &str = "intrinsics";
const DISTORTION: &str = "distortion";
const VIEW_VARIABLES: [VariableType; 3] = [
    VariableType::Euclidean(4),
    VariableType::Euclidean(8),
    VariableType::SE3,
];

const MIN_DEPTH: f64 = 1e-6;
const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;
const MIN_OUTLIER_THRESHOLD_PX: f64 = 1.0;
const MIN_POINTS_PER_VIEW: usize = 4;
const JITTER_SEED: u64 = 0x5eed;

/// Fewest accepted board views the solve runs on. One or two planar views
/// cannot separate the focal lengths from the principal point.
pub const MIN_BOARD_VIEWS: usize = 3;

/// One accepted board view.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    /// Position of the frame in the video.
    pub frame_index: usize,
    /// Detected corners by cell.
    pub board: ObservationBoard,
    /// Board-to-camera pose seed.
    pub seed: Isometry3<f64>,
    /// Homography from the board plane (meters) to pixels.
    pub homography: Option<Matrix3<f64>>,
}

impl FrameObservation {
    /// Seed a view from its corners using a provisional camera.
    ///
    /// `None` when the corners do not give a usable pose.
    pub fn from_board(
        frame_index: usize,
        board: ObservationBoard,
        geometry: &CharucoBoard,
        camera: &PinholeCamera,
    ) -> Option<Self> {
        let (object, image) = correspondences(&board, geometry);
        if object.len() < MIN_POINTS_PER_VIEW {
            return None;
        }
        let plane: Vec<[f64; 2]> = object.iter().map(|p| [p[0], p[1]]).collect();
        let homography = dlt_homography(&plane, &image).ok();
        match solve_planar_pnp(&object, &image, camera, &LMParams::default()) {
            Ok(pnp) => Some(Self {
                frame_index,
                board,
                seed: pnp.to_isometry(),
                homography,
            }),
            Err(err) => {
                log::debug!("frame {frame_index}: no seed pose ({err})");
                None
            }
        }
    }
}

/// Outcome of [`calibrate_intrinsics`].
#[derive(Debug, Clone)]
pub struct IntrinsicsSolution {
    /// The calibrated model.
    pub model: CameraModel,
    /// Views used by the final stage.
    pub views: usize,
    /// Corners used by the final stage.
    pub inliers: usize,
    /// Corners dropped as outliers.
    pub outliers: usize,
    /// LM iterations across all stages.
    pub iterations: usize,
}

/// Pixel focal length guess: Zhang's closed form over the view homographies,
/// the image width when that fails.
pub fn seed_focal_length(
    observations: &[FrameObservation],
    image_size: (usize, usize),
) -> f64 {
    let (cx, cy) = principal_point_seed(image_size);
    let homographies: Vec<Matrix3<f64>> =
        observations.iter().filter_map(|o| o.homography).collect();
    focal_from_homographies(&homographies, cx, cy)
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(image_size.0 as f64)
}

/// Principal point at the center of the pixel grid.
pub fn principal_point_seed((width, height): (usize, usize)) -> (f64, f64) {
    (width as f64 / 2.0 - 0.5, height as f64 / 2.0 - 0.5)
}

/// Jointly solve intrinsics, distortion and frame poses.
pub fn calibrate_intrinsics(
    observations: &[FrameObservation],
    board: &CharucoBoard,
    image_size: (usize, usize),
    max_iterations: usize,
    cancel: &CancelToken,
) -> Result<IntrinsicsSolution, CalibrationFailure> {
    let focal = seed_focal_length(observations, image_size);
    let (cx, cy) = principal_point_seed(image_size);
    log::info!(
        "seeding intrinsics: f = {focal:.1}, c = ({cx:.1}, {cy:.1}) for {}x{}",
        image_size.0,
        image_size.1
    );

    let k_inv = CameraIntrinsics::new(focal, focal, cx, cy)
        .matrix()
        .try_inverse()
        .ok_or_else(|| CalibrationFailure::SolveDidNotConverge("singular seed".to_string()))?;

    let mut views = Vec::with_capacity(observations.len());
    for obs in observations {
        let (object, image) = correspondences(&obs.board, board);
        if object.len() < MIN_POINTS_PER_VIEW {
            continue;
        }
        // the worker seed used a provisional focal length
        let pose = obs
            .homography
            .and_then(|h| decompose_plane_homography(&(k_inv * h)).ok())
            .map(|(r, t)| Isometry3::from_parts(t.into(), r.into()))
            .unwrap_or(obs.seed);
        views.push(View {
            object,
            image,
            pose,
        });
    }
    if views.len() < MIN_BOARD_VIEWS {
        return Err(CalibrationFailure::InsufficientObservations(format!(
            "{} usable board views, need at least {MIN_BOARD_VIEWS}",
            views.len()
        )));
    }

    let mut state = SolveState {
        intrinsics: [focal, focal, cx, cy],
        distortion: [0.0; 8],
        views,
    };
    let budgets = stage_budgets(max_iterations);
    let mut iterations = 0;

    iterations += state.run_stage(Stage::PosesOnly, budgets[0], cancel)?;
    iterations += state.run_stage(Stage::Pinhole, budgets[1], cancel)?;

    let mut rng = StdRng::seed_from_u64(JITTER_SEED);
    for (i, d) in state.distortion.iter_mut().enumerate() {
        let scale = if i < 5 { 1e-6 } else { 1e-9 };
        *d = rng.random_range(-scale..scale);
    }
    iterations += state.run_stage(Stage::Full, budgets[2], cancel)?;

    let rms = state.rms_error();
    let threshold = (3.0 * rms).max(MIN_OUTLIER_THRESHOLD_PX);
    let outliers = state.reject_outliers(threshold);
    log::info!("dropped {outliers} corners above {threshold:.3}px (rms {rms:.3}px)");
    if state.views.is_empty() {
        return Err(CalibrationFailure::InsufficientObservations(
            "every view was rejected as an outlier".to_string(),
        ));
    }
    iterations += state.run_stage(Stage::Full, budgets[3], cancel)?;

    let error = state.rms_error();
    let [fx, fy, cx, cy] = state.intrinsics;
    let finite = state.intrinsics.iter().chain(state.distortion.iter()).all(|v| v.is_finite());
    if !finite || !error.is_finite() || fx <= 0.0 || fy <= 0.0 {
        return Err(CalibrationFailure::SolveDidNotConverge(format!(
            "degenerate solution fx={fx} fy={fy} rms={error}"
        )));
    }
    log::info!(
        "intrinsics: fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2}, rms {error:.4}px over {} views",
        state.views.len()
    );

    let inliers = state.views.iter().map(|v| v.object.len()).sum();
    Ok(IntrinsicsSolution {
        model: CameraModel::new(
            [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            state.distortion,
            error,
        ),
        views: state.views.len(),
        inliers,
        outliers,
        iterations,
    })
}

/// Split the budget 10/20/30/40 across the four stages.
fn stage_budgets(max_iterations: usize) -> [usize; 4] {
    let a = (max_iterations / 10).max(1);
    let b = (max_iterations / 5).max(1);
    let c = (3 * max_iterations / 10).max(1);
    let d = max_iterations.saturating_sub(a + b + c).max(1);
    [a, b, c, d]
}

fn correspondences(
    observed: &ObservationBoard,
    board: &CharucoBoard,
) -> (Vec<[f64; 3]>, Vec<[f64; 2]>) {
    observed
        .observed()
        .filter_map(|(k, uv)| board.object_point(k).map(|p| (p, uv)))
        .unzip()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PosesOnly,
    Pinhole,
    Full,
}

struct View {
    object: Vec<[f64; 3]>,
    image: Vec<[f64; 2]>,
    pose: Isometry3<f64>,
}

struct SolveState {
    intrinsics: [f64; 4],
    distortion: [f64; 8],
    views: Vec<View>,
}

impl SolveState {
    fn run_stage(
        &mut self,
        stage: Stage,
        budget: usize,
        cancel: &CancelToken,
    ) -> Result<usize, CalibrationFailure> {
        if cancel.is_cancelled() {
            return Err(CalibrationFailure::Cancelled);
        }
        let mut problem = self.build_problem(stage).map_err(solve_failure)?;

        let result = LevenbergMarquardt::with_max_iterations(budget)
            .optimize_with_callback(&mut problem, |_, _| !cancel.is_cancelled())
            .map_err(solve_failure)?;
        if cancel.is_cancelled() {
            return Err(CalibrationFailure::Cancelled);
        }
        log::debug!(
            "stage {stage:?}: cost {:.6} after {} iterations ({:?})",
            result.final_cost,
            result.iterations,
            result.termination_reason
        );

        self.read_back(&problem).map_err(solve_failure)?;
        Ok(result.iterations)
    }

    fn build_problem(&self, stage: Stage) -> Result<Problem, OptimizerError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean(INTRINSICS, 4), self.intrinsics.to_vec())?;
        problem.add_variable(Variable::euclidean(DISTORTION, 8), self.distortion.to_vec())?;
        problem.set_fixed(INTRINSICS, stage == Stage::PosesOnly)?;
        problem.set_fixed(DISTORTION, stage != Stage::Full)?;

        for (i, view) in self.views.iter().enumerate() {
            let name = frame_name(i);
            problem.add_variable(Variable::se3(name.clone()), isometry_to_params(&view.pose))?;
            problem.set_marginalized(&name, true)?;
            problem.add_factor(
                Box::new(BoardViewFactor {
                    object: view.object.clone(),
                    image: view.image.clone(),
                }),
                vec![INTRINSICS.to_string(), DISTORTION.to_string(), name],
            )?;
        }
        Ok(problem)
    }

    fn read_back(&mut self, problem: &Problem) -> Result<(), OptimizerError> {
        copy_into(&mut self.intrinsics, problem.values(INTRINSICS)?);
        copy_into(&mut self.distortion, problem.values(DISTORTION)?);
        for (i, view) in self.views.iter_mut().enumerate() {
            view.pose = isometry_from_params(problem.values(&frame_name(i))?)?;
        }
        Ok(())
    }

    fn camera(&self) -> (CameraIntrinsics, PolynomialDistortion) {
        let [fx, fy, cx, cy] = self.intrinsics;
        (
            CameraIntrinsics::new(fx, fy, cx, cy),
            PolynomialDistortion::from_opencv(&self.distortion),
        )
    }

    /// Per corner reprojection error in pixels, view by view.
    fn corner_errors(&self) -> Vec<Vec<f64>> {
        let (intrinsics, distortion) = self.camera();
        self.views
            .iter()
            .map(|view| {
                view.object
                    .iter()
                    .zip(view.image.iter())
                    .map(|(p, uv)| {
                        let r = reproject(&intrinsics, &distortion, &view.pose, p, uv);
                        r[0].hypot(r[1])
                    })
                    .collect()
            })
            .collect()
    }

    fn rms_error(&self) -> f64 {
        let errors = self.corner_errors();
        let (sum, count) = errors
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, n), e| (s + e * e, n + 1));
        if count == 0 {
            return f64::INFINITY;
        }
        (sum / count as f64).sqrt()
    }

    /// Remove corners above `threshold` px and views left too sparse.
    fn reject_outliers(&mut self, threshold: f64) -> usize {
        let errors = self.corner_errors();
        let mut dropped = 0;
        for (view, errs) in self.views.iter_mut().zip(errors) {
            let keep: Vec<bool> = errs.iter().map(|e| *e <= threshold).collect();
            dropped += keep.iter().filter(|k| !**k).count();
            let mut flags = keep.iter();
            view.object.retain(|_| flags.next().copied().unwrap_or(false));
            let mut flags = keep.iter();
            view.image.retain(|_| flags.next().copied().unwrap_or(false));
        }
        self.views.retain(|v| v.object.len() >= MIN_POINTS_PER_VIEW);
        dropped
    }
}

fn frame_name(i: usize) -> String {
    format!("frame_{i}")
}

fn copy_into<const N: usize>(dst: &mut [f64; N], src: &[f64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s;
    }
}

fn solve_failure(err: impl std::fmt::Display) -> CalibrationFailure {
    CalibrationFailure::SolveDidNotConverge(err.to_string())
}

fn reproject(
    intrinsics: &CameraIntrinsics,
    distortion: &PolynomialDistortion,
    pose: &Isometry3<f64>,
    p: &[f64; 3],
    uv: &[f64; 2],
) -> [f64; 2] {
    let pc = pose * Point3::new(p[0], p[1], p[2]);
    if pc.z <= MIN_DEPTH {
        return [BEHIND_CAMERA_RESIDUAL; 2];
    }
    let (xd, yd) = distortion.distort(pc.x / pc.z, pc.y / pc.z);
    let (u, v) = intrinsics.denormalize(xd, yd);
    [u - uv[0], v - uv[1]]
}

/// Pixel residuals of one board view.
struct BoardViewFactor {
    object: Vec<[f64; 3]>,
    image: Vec<[f64; 2]>,
}

impl BoardViewFactor {
    fn residual(&self, params: &[&[f64]]) -> FactorResult<Vec<f64>> {
        let [k, d, pose] = params else {
            return Err(FactorError::DimensionMismatch {
                expected: 3,
                actual: params.len(),
            });
        };
        let coeffs: [f64; 8] = (*d).try_into().map_err(|_| FactorError::DimensionMismatch {
            expected: 8,
            actual: d.len(),
        })?;
        if k.len() != 4 {
            return Err(FactorError::DimensionMismatch {
                expected: 4,
                actual: k.len(),
            });
        }
        let intrinsics = CameraIntrinsics::new(k[0], k[1], k[2], k[3]);
        let distortion = PolynomialDistortion::from_opencv(&coeffs);
        let pose = isometry_from_params(pose)
            .map_err(|e| FactorError::InvalidParameters(e.to_string()))?;

        let mut residual = Vec::with_capacity(2 * self.object.len());
        for (p, uv) in self.object.iter().zip(self.image.iter()) {
            residual.extend(reproject(&intrinsics, &distortion, &pose, p, uv));
        }
        Ok(residual)
    }
}

impl Factor for BoardViewFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        numeric_linearize(&VIEW_VARIABLES, params, compute_jacobian, |p| {
            self.residual(p)
        })
    }

    fn residual_dim(&self) -> usize {
        2 * self.object.len()
    }

    fn num_variables(&self) -> usize {
        VIEW_VARIABLES.len()
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        VIEW_VARIABLES.get(idx).map_or(0, |t| t.local_dim())
    }
}
