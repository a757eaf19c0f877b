use approx::assert_relative_eq;
use nalgebra::{DMatrix, Isometry3, Point3, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use wpical_optim::{
    isometry_from_params, isometry_to_params, numeric_linearize, Factor, FactorResult,
    HuberLoss, LevenbergMarquardt, LinearizationResult, OptimizerError, Problem, ProblemError,
    RobustLoss, Variable, VariableType,
};

/// residual = [k * s - a, s - b] for a shared gain `k` and a per-sample state `s`.
struct GainFactor {
    a: f64,
    b: f64,
}

impl Factor for GainFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        let k = params[0][0];
        let s = params[1][0];
        let residual = vec![k * s - self.a, s - self.b];
        Ok(if compute_jacobian {
            LinearizationResult::with_jacobian(
                residual,
                DMatrix::from_row_slice(2, 2, &[s, k, 0.0, 1.0]),
            )
        } else {
            LinearizationResult::residual_only(residual)
        })
    }

    fn residual_dim(&self) -> usize {
        2
    }

    fn num_variables(&self) -> usize {
        2
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        1
    }
}

fn gain_problem(marginalize: bool) -> Problem {
    let mut problem = Problem::new();
    problem
        .add_variable(Variable::euclidean("k", 1), vec![1.0])
        .unwrap();
    for i in 0..10 {
        let s = 0.5 + i as f64 * 0.3;
        let name = format!("s{i}");
        problem
            .add_variable(Variable::euclidean(&name, 1), vec![s + 0.2])
            .unwrap();
        if marginalize {
            problem.set_marginalized(&name, true).unwrap();
        }
        problem
            .add_factor(
                Box::new(GainFactor { a: 2.5 * s, b: s }),
                vec!["k".to_string(), name],
            )
            .unwrap();
    }
    problem
}

#[test]
fn schur_solution_matches_dense_solution() {
    let mut dense = gain_problem(false);
    let mut schur = gain_problem(true);

    let optimizer = LevenbergMarquardt::default();
    let dense_result = optimizer.optimize(&mut dense).unwrap();
    let schur_result = optimizer.optimize(&mut schur).unwrap();

    assert!(dense_result.final_cost < 1e-10);
    assert!(schur_result.final_cost < 1e-10);
    assert_relative_eq!(schur.values("k").unwrap()[0], 2.5, epsilon = 1e-5);
    for i in 0..10 {
        let name = format!("s{i}");
        assert_relative_eq!(
            schur.values(&name).unwrap()[0],
            dense.values(&name).unwrap()[0],
            epsilon = 1e-5
        );
    }
}

#[test]
fn only_marginalized_variables_are_solved() {
    let mut problem = gain_problem(true);
    problem.set_fixed("k", true).unwrap();

    LevenbergMarquardt::default().optimize(&mut problem).unwrap();

    // k is held at 1.0, each s balances k * s = 2.5 s* against s = s*
    assert_eq!(problem.values("k").unwrap()[0], 1.0);
    let s_star = 0.5;
    let expected = (2.5 * s_star + s_star) / 2.0;
    assert_relative_eq!(problem.values("s0").unwrap()[0], expected, epsilon = 1e-5);
}

#[test]
fn coupled_marginalized_variables_are_rejected() {
    let mut problem = Problem::new();
    for name in ["a", "b"] {
        problem
            .add_variable(Variable::euclidean(name, 1), vec![0.0])
            .unwrap();
        problem.set_marginalized(name, true).unwrap();
    }
    problem
        .add_factor(
            Box::new(GainFactor { a: 1.0, b: 1.0 }),
            vec!["a".to_string(), "b".to_string()],
        )
        .unwrap();

    let err = LevenbergMarquardt::default()
        .optimize(&mut problem)
        .unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::Problem(ProblemError::MarginalizedCoupling { .. })
    ));
}

/// Aligns a rigid pose to observed 3D points, with an optional robust loss.
struct PointAlignFactor {
    model: Point3<f64>,
    observed: Point3<f64>,
    loss: Option<HuberLoss>,
}

impl Factor for PointAlignFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        numeric_linearize(&[VariableType::SE3], params, compute_jacobian, |p| {
            let pose = isometry_from_params(p[0])
                .map_err(|e| wpical_optim::FactorError::InvalidParameters(e.to_string()))?;
            let r = pose * self.model - self.observed;
            Ok(vec![r.x, r.y, r.z])
        })
    }

    fn residual_dim(&self) -> usize {
        3
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        6
    }

    fn get_loss(&self) -> Option<&dyn RobustLoss> {
        self.loss.as_ref().map(|l| l as &dyn RobustLoss)
    }
}

#[test]
fn se3_pose_alignment_with_outlier() {
    let truth = Isometry3::new(Vector3::new(0.3, -0.2, 1.5), Vector3::new(0.2, -0.1, 0.4));
    let mut rng = StdRng::seed_from_u64(7);

    let mut problem = Problem::new();
    problem
        .add_variable(Variable::se3("T"), isometry_to_params(&Isometry3::identity()))
        .unwrap();
    problem.set_marginalized("T", true).unwrap();

    for i in 0..30 {
        let model = Point3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let mut observed = truth * model;
        if i == 0 {
            observed.x += 5.0;
        }
        problem
            .add_factor(
                Box::new(PointAlignFactor {
                    model,
                    observed,
                    loss: Some(HuberLoss::new(0.1).unwrap()),
                }),
                vec!["T".to_string()],
            )
            .unwrap();
    }

    let result = LevenbergMarquardt::with_max_iterations(200)
        .optimize(&mut problem)
        .unwrap();
    assert!(result.final_cost.is_finite());

    let estimate = isometry_from_params(problem.values("T").unwrap()).unwrap();
    assert_relative_eq!(
        estimate.translation.vector,
        truth.translation.vector,
        epsilon = 1e-2
    );
    assert!(estimate.rotation.angle_to(&truth.rotation) < 1e-2);
}
