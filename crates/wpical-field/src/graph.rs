//! Pose graph over tags and camera frames.
//!
//! Tag nodes hold field-from-tag poses, frame nodes camera-from-field poses.
//! Each tag seen in a frame adds a factor on the pixel error of its four
//! corners. Exactly one node is held fixed: the pinned tag at its ideal pose.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Point3;
use wpical_camera::CancelToken;
use wpical_layout::Pose3d;
use wpical_optim::{
    isometry_from_params, isometry_to_params, numeric_linearize, Factor, FactorError,
    FactorResult, HuberLoss, LevenbergMarquardt, LinearizationResult, OptimizerError, Problem,
    RobustLoss, Variable, VariableType,
};
use wpical_pnp::PinholeCamera;

use crate::error::FieldError;
use crate::tag_pose::tag_corners;

const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;
const EDGE_VARIABLES: [VariableType; 2] = [VariableType::SE3, VariableType::SE3];

/// A tag seen in one frame.
#[derive(Debug, Clone)]
pub struct TagObservation {
    pub tag_id: i32,
    /// Corner pixels in detector order.
    pub corners: [[f64; 2]; 4],
    /// Single-view pose estimate, WPILib tag frame.
    pub camera_from_tag: Pose3d,
}

/// Every tag seen in one frame of one video.
#[derive(Debug, Clone)]
pub struct FrameTags {
    /// Index of the video in the input directory.
    pub video: usize,
    /// Frame index within the video.
    pub frame_index: usize,
    pub tags: Vec<TagObservation>,
}

/// Tags and camera frames joined by corner observations.
pub struct PoseGraph {
    camera: PinholeCamera,
    tag_size_m: f64,
    frames: Vec<FrameTags>,
    tag_poses: BTreeMap<i32, Pose3d>,
    frame_poses: Vec<Option<Pose3d>>,
}

impl PoseGraph {
    /// Build the graph from per-frame observations.
    ///
    /// Frames seeing fewer than two distinct tags carry no relative geometry
    /// and are dropped. Repeated IDs within a frame keep the first detection.
    pub fn build(
        frames: impl IntoIterator<Item = FrameTags>,
        camera: PinholeCamera,
        tag_size_m: f64,
    ) -> Self {
        let frames: Vec<FrameTags> = frames
            .into_iter()
            .filter_map(|mut frame| {
                let mut seen = BTreeSet::new();
                frame.tags.retain(|t| seen.insert(t.tag_id));
                (frame.tags.len() >= 2).then_some(frame)
            })
            .collect();
        log::debug!("pose graph: {} frames with two or more tags", frames.len());
        let frame_poses = vec![None; frames.len()];
        Self {
            camera,
            tag_size_m,
            frames,
            tag_poses: BTreeMap::new(),
            frame_poses,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// IDs of every observed tag.
    pub fn tag_ids(&self) -> BTreeSet<i32> {
        self.frames
            .iter()
            .flat_map(|f| f.tags.iter().map(|t| t.tag_id))
            .collect()
    }

    pub fn observes(&self, tag_id: i32) -> bool {
        self.frames
            .iter()
            .any(|f| f.tags.iter().any(|t| t.tag_id == tag_id))
    }

    /// Current field-from-tag estimates.
    pub fn tag_poses(&self) -> &BTreeMap<i32, Pose3d> {
        &self.tag_poses
    }

    /// Chain single-view estimates outward from the pinned tag.
    ///
    /// Returns the observed tags that cannot be reached from the pinned tag;
    /// they are left out of the solve.
    pub fn initialize(&mut self, pinned_id: i32, pinned_pose: Pose3d) -> Result<Vec<i32>, FieldError> {
        if !self.observes(pinned_id) {
            return Err(FieldError::PinnedTagNotObserved(pinned_id));
        }
        self.tag_poses.clear();
        self.tag_poses.insert(pinned_id, pinned_pose);
        self.frame_poses = vec![None; self.frames.len()];

        let mut changed = true;
        while changed {
            changed = false;
            for (frame, pose) in self.frames.iter().zip(self.frame_poses.iter_mut()) {
                if pose.is_none() {
                    *pose = frame.tags.iter().find_map(|obs| {
                        self.tag_poses
                            .get(&obs.tag_id)
                            .map(|field_from_tag| field_from_tag * obs.camera_from_tag.inverse())
                    });
                }
                let Some(field_from_camera) = pose else {
                    continue;
                };
                for obs in &frame.tags {
                    if !self.tag_poses.contains_key(&obs.tag_id) {
                        self.tag_poses
                            .insert(obs.tag_id, *field_from_camera * obs.camera_from_tag);
                        changed = true;
                    }
                }
            }
        }

        let unreachable: Vec<i32> = self
            .tag_ids()
            .into_iter()
            .filter(|id| !self.tag_poses.contains_key(id))
            .collect();
        for id in &unreachable {
            log::warn!("tag {id} is not connected to pinned tag {pinned_id}");
        }
        Ok(unreachable)
    }

    /// Jointly refine every reachable tag and frame, the pinned tag held fixed.
    pub fn solve(
        &mut self,
        pinned_id: i32,
        max_iterations: usize,
        huber_delta_px: f64,
        cancel: &CancelToken,
    ) -> Result<BTreeMap<i32, Pose3d>, FieldError> {
        if !self.tag_poses.contains_key(&pinned_id) {
            return Err(FieldError::PinnedTagNotObserved(pinned_id));
        }
        if self.tag_poses.len() < 2 {
            return Ok(self.tag_poses.clone());
        }

        let mut problem = self.build_problem(pinned_id, huber_delta_px)?;
        let result = LevenbergMarquardt::with_max_iterations(max_iterations)
            .optimize_with_callback(&mut problem, |_, _| !cancel.is_cancelled())?;
        if cancel.is_cancelled() {
            return Err(FieldError::Cancelled);
        }
        log::info!(
            "pose graph: {} tags, {} frames, cost {:.4} after {} iterations ({:?})",
            self.tag_poses.len(),
            self.frame_poses.iter().flatten().count(),
            result.final_cost,
            result.iterations,
            result.termination_reason
        );

        for (id, pose) in self.tag_poses.iter_mut() {
            *pose = read_pose(&problem, &tag_name(*id))?;
        }
        for (i, pose) in self.frame_poses.iter_mut().enumerate() {
            if pose.is_some() {
                *pose = Some(read_pose(&problem, &frame_name(i))?.inverse());
            }
        }
        Ok(self.tag_poses.clone())
    }

    fn build_problem(&self, pinned_id: i32, huber_delta_px: f64) -> Result<Problem, OptimizerError> {
        let loss = HuberLoss::new(huber_delta_px)?;
        let corners = tag_corners(self.tag_size_m);

        let mut problem = Problem::new();
        for (id, pose) in &self.tag_poses {
            let name = tag_name(*id);
            problem.add_variable(Variable::se3(name.clone()), isometry_to_params(pose))?;
            problem.set_fixed(&name, *id == pinned_id)?;
        }
        for (i, (frame, pose)) in self.frames.iter().zip(self.frame_poses.iter()).enumerate() {
            let Some(field_from_camera) = pose else {
                continue;
            };
            let name = frame_name(i);
            problem.add_variable(
                Variable::se3(name.clone()),
                isometry_to_params(&field_from_camera.inverse()),
            )?;
            problem.set_marginalized(&name, true)?;

            for obs in &frame.tags {
                if !self.tag_poses.contains_key(&obs.tag_id) {
                    continue;
                }
                problem.add_factor(
                    Box::new(TagCornerFactor {
                        corners,
                        image: obs.corners,
                        camera: self.camera.clone(),
                        loss,
                    }),
                    vec![tag_name(obs.tag_id), name.clone()],
                )?;
            }
        }
        Ok(problem)
    }
}

fn read_pose(problem: &Problem, name: &str) -> Result<Pose3d, OptimizerError> {
    Ok(isometry_from_params(problem.values(name)?)?)
}

fn tag_name(id: i32) -> String {
    format!("tag_{id}")
}

fn frame_name(i: usize) -> String {
    format!("frame_{i}")
}

/// Pixel error of one tag's corners seen from one frame.
struct TagCornerFactor {
    corners: [[f64; 3]; 4],
    image: [[f64; 2]; 4],
    camera: PinholeCamera,
    loss: HuberLoss,
}

impl TagCornerFactor {
    fn residual(&self, params: &[&[f64]]) -> FactorResult<Vec<f64>> {
        let [tag, frame] = params else {
            return Err(FactorError::DimensionMismatch {
                expected: 2,
                actual: params.len(),
            });
        };
        let field_from_tag =
            isometry_from_params(tag).map_err(|e| FactorError::InvalidParameters(e.to_string()))?;
        let camera_from_field = isometry_from_params(frame)
            .map_err(|e| FactorError::InvalidParameters(e.to_string()))?;
        let camera_from_tag = camera_from_field * field_from_tag;

        let mut residual = Vec::with_capacity(8);
        for (p, uv) in self.corners.iter().zip(self.image.iter()) {
            let pc = camera_from_tag * Point3::new(p[0], p[1], p[2]);
            match self.camera.project(&pc) {
                Some([u, v]) => residual.extend([u - uv[0], v - uv[1]]),
                None => residual.extend([BEHIND_CAMERA_RESIDUAL; 2]),
            }
        }
        Ok(residual)
    }
}

impl Factor for TagCornerFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        numeric_linearize(&EDGE_VARIABLES, params, compute_jacobian, |p| {
            self.residual(p)
        })
    }

    fn residual_dim(&self) -> usize {
        8
    }

    fn num_variables(&self) -> usize {
        EDGE_VARIABLES.len()
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        EDGE_VARIABLES.get(idx).map_or(0, |t| t.local_dim())
    }

    fn get_loss(&self) -> Option<&dyn RobustLoss> {
        Some(&self.loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};
    use wpical_pnp::CameraIntrinsics;

    fn observation(tag_id: i32, camera_from_tag: Pose3d) -> TagObservation {
        TagObservation {
            tag_id,
            corners: [[0.0; 2]; 4],
            camera_from_tag,
        }
    }

    fn camera() -> PinholeCamera {
        PinholeCamera::pinhole(CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0))
    }

    #[test]
    fn test_single_tag_frames_are_dropped() {
        let frames = vec![
            FrameTags {
                video: 0,
                frame_index: 0,
                tags: vec![observation(1, Pose3d::identity())],
            },
            FrameTags {
                video: 0,
                frame_index: 1,
                tags: vec![
                    observation(1, Pose3d::identity()),
                    observation(1, Pose3d::identity()),
                ],
            },
        ];
        let graph = PoseGraph::build(frames, camera(), 0.1651);
        assert_eq!(graph.frame_count(), 0);
        assert!(!graph.observes(1));
    }

    #[test]
    fn test_initialize_chains_through_frames() -> Result<(), FieldError> {
        let field_from_tag = |x: f64| {
            Pose3d::from_parts(
                Translation3::new(x, 2.0, 1.0),
                UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::PI),
            )
        };
        let truth: BTreeMap<i32, Pose3d> =
            [(1, field_from_tag(0.0)), (2, field_from_tag(1.0)), (3, field_from_tag(2.0))]
                .into_iter()
                .collect();
        let field_from_camera = [Pose3d::translation(0.5, 0.0, 1.0), Pose3d::translation(1.5, 0.0, 1.0)];
        let seen = |f: usize, id: i32| observation(id, field_from_camera[f].inverse() * truth[&id]);

        let frames = vec![
            FrameTags {
                video: 0,
                frame_index: 0,
                tags: vec![seen(0, 1), seen(0, 2)],
            },
            FrameTags {
                video: 0,
                frame_index: 1,
                tags: vec![seen(1, 2), seen(1, 3)],
            },
            FrameTags {
                video: 1,
                frame_index: 0,
                tags: vec![
                    observation(8, Pose3d::identity()),
                    observation(9, Pose3d::identity()),
                ],
            },
        ];
        let mut graph = PoseGraph::build(frames, camera(), 0.1651);
        let unreachable = graph.initialize(1, truth[&1])?;

        assert_eq!(unreachable, vec![8, 9]);
        for (id, pose) in graph.tag_poses() {
            assert_relative_eq!(pose.translation.vector, truth[id].translation.vector, epsilon = 1e-9);
        }
        assert!(matches!(
            graph.initialize(5, Pose3d::identity()),
            Err(FieldError::PinnedTagNotObserved(5))
        ));
        Ok(())
    }
}
