//! Levenberg-Marquardt with Schur elimination of marginalized variables.
//!
//! Every step solves the damped normal equations `(J^T J + λI) δ = -J^T r`.
//! Marginalized blocks (one pose per camera frame, typically) are folded into
//! the reduced system first and recovered by back-substitution, so only a
//! matrix the size of the shared parameters is ever factored.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::linear_system::{LinearSystemBuilder, NormalEquations, Slot, VariableLayout};
use crate::graph::{FactorError, Problem, ProblemError};
use crate::param::ParamError;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Problem error: {0}")]
    Problem(#[from] ProblemError),

    #[error("Factor evaluation failed: {0}")]
    Factor(#[from] FactorError),

    #[error("Linear system solve failed: {0}")]
    SolveFailed(String),

    /// The problem cannot be optimized as posed: nothing free, no factors, or a
    /// non-finite starting cost.
    #[error("Degenerate problem: {0}")]
    Degenerate(String),

    #[error("Parameter update failed: {0}")]
    Param(#[from] ParamError),
}

#[derive(Debug, Clone)]
pub struct OptimizerResult {
    pub final_cost: f64,
    pub iterations: usize,
    pub termination_reason: TerminationReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminationReason {
    /// Relative cost change or step size fell below tolerance.
    CostConverged,
    GradientConverged,
    MaxIterations,
    /// Damping grew past `lambda_max` without an improving step.
    LambdaMaxExceeded,
    /// The callback asked to stop.
    Interrupted,
}

impl TerminationReason {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            TerminationReason::CostConverged | TerminationReason::GradientConverged
        )
    }
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    pub lambda_init: f64,
    pub lambda_max: f64,
    /// Damping is multiplied by this on a rejected step, divided on an accepted one.
    pub lambda_factor: f64,
    pub max_iterations: usize,
    /// Relative cost change below which the solve is converged.
    pub cost_tolerance: f64,
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 50,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
        }
    }
}

/// What the callback sees after every iteration.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerState {
    pub iteration: usize,
    pub cost: f64,
    pub lambda: f64,
    /// `None` before the first step.
    pub last_step_accepted: Option<bool>,
}

impl OptimizerState {
    fn finish(&self, termination_reason: TerminationReason) -> OptimizerResult {
        log::debug!(
            "LM stopped after {} iterations, cost {:e}: {termination_reason:?}",
            self.iteration,
            self.cost
        );
        OptimizerResult {
            final_cost: self.cost,
            iterations: self.iteration,
            termination_reason,
        }
    }
}

/// Kept step plus one step per marginal block.
struct DampedStep {
    kept: DVector<f64>,
    marginal: Vec<DVector<f64>>,
}

impl DampedStep {
    fn norm(&self) -> f64 {
        let marginal: f64 = self.marginal.iter().map(|d| d.norm_squared()).sum();
        (self.kept.norm_squared() + marginal).sqrt()
    }
}

enum StepOutcome {
    Accepted(f64),
    Rejected,
    Converged(f64),
}

impl LevenbergMarquardt {
    /// Steps shorter than this count as no step at all.
    const MIN_STEP_NORM: f64 = 1e-12;
    const MIN_LAMBDA: f64 = 1e-10;

    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    pub fn optimize(&self, problem: &mut Problem) -> Result<OptimizerResult, OptimizerError> {
        self.optimize_with_callback(problem, |_problem, _state| true)
    }

    /// Run the optimizer, calling `callback` before the first step and after
    /// every iteration. Returning `false` stops with
    /// [`TerminationReason::Interrupted`], keeping the current values.
    pub fn optimize_with_callback<F>(
        &self,
        problem: &mut Problem,
        mut callback: F,
    ) -> Result<OptimizerResult, OptimizerError>
    where
        F: FnMut(&Problem, &OptimizerState) -> bool,
    {
        if problem.num_factors() == 0 {
            return Err(OptimizerError::Degenerate("no factors".to_string()));
        }
        let layout = VariableLayout::from_problem(problem)?;
        if layout.free_local_dim() == 0 {
            return Err(OptimizerError::Degenerate("no free variables".to_string()));
        }

        let initial_cost = problem.compute_total_cost()?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::Degenerate(format!(
                "initial cost is {initial_cost}"
            )));
        }

        let mut state = OptimizerState {
            iteration: 0,
            cost: initial_cost,
            lambda: self.lambda_init,
            last_step_accepted: None,
        };
        if !callback(problem, &state) {
            return Ok(state.finish(TerminationReason::Interrupted));
        }

        // relinearize only after an accepted step
        let mut cached: Option<NormalEquations> = None;

        while state.iteration < self.max_iterations {
            let system = match cached.take() {
                Some(system) => system,
                None => LinearSystemBuilder::build(problem, &layout)?,
            };
            if system.gradient_norm() < self.gradient_tolerance {
                return Ok(state.finish(TerminationReason::GradientConverged));
            }

            let outcome = match self.solve_damped_system(&system, state.lambda) {
                Ok(step) if step.norm() < Self::MIN_STEP_NORM => {
                    return Ok(state.finish(TerminationReason::CostConverged));
                }
                Ok(step) => self.try_step(problem, &layout, &step, state.cost)?,
                Err(err) => {
                    log::debug!("damped solve failed at lambda {:e}: {err}", state.lambda);
                    StepOutcome::Rejected
                }
            };
            state.iteration += 1;

            match outcome {
                StepOutcome::Converged(cost) => {
                    state.cost = cost;
                    return Ok(state.finish(TerminationReason::CostConverged));
                }
                StepOutcome::Accepted(cost) => {
                    state.cost = cost;
                    state.lambda = (state.lambda / self.lambda_factor).max(Self::MIN_LAMBDA);
                    state.last_step_accepted = Some(true);
                }
                StepOutcome::Rejected => {
                    state.lambda *= self.lambda_factor;
                    state.last_step_accepted = Some(false);
                    cached = Some(system);
                    if state.lambda > self.lambda_max {
                        return Ok(state.finish(TerminationReason::LambdaMaxExceeded));
                    }
                }
            }

            if !callback(problem, &state) {
                return Ok(state.finish(TerminationReason::Interrupted));
            }
        }

        Ok(state.finish(TerminationReason::MaxIterations))
    }

    /// Solve the damped system with the marginal blocks eliminated:
    ///
    /// `S = A + λI - Σ B_m (C_m + λI)^-1 B_m^T`,
    /// `S δk = -g_k + Σ B_m (C_m + λI)^-1 g_m`,
    /// `δm = (C_m + λI)^-1 (-g_m - B_m^T δk)`.
    fn solve_damped_system(
        &self,
        system: &NormalEquations,
        lambda: f64,
    ) -> Result<DampedStep, OptimizerError> {
        let k = system.jtr.len();
        let mut reduced = &system.jtj + DMatrix::identity(k, k) * lambda;
        let mut rhs = -&system.jtr;

        let mut inverses = Vec::with_capacity(system.blocks.len());
        for block in &system.blocks {
            let dim = block.hmm.nrows();
            let c_inv = (&block.hmm + DMatrix::identity(dim, dim) * lambda)
                .try_inverse()
                .ok_or_else(|| OptimizerError::SolveFailed("marginal block is singular".into()))?;
            if k > 0 {
                let b_cinv = &block.hkm * &c_inv;
                reduced -= &b_cinv * block.hkm.transpose();
                rhs += &b_cinv * &block.gm;
            }
            inverses.push(c_inv);
        }

        let kept = if k > 0 {
            reduced
                .lu()
                .solve(&rhs)
                .ok_or_else(|| OptimizerError::SolveFailed("reduced system is singular".into()))?
        } else {
            DVector::zeros(0)
        };

        let marginal = system
            .blocks
            .iter()
            .zip(&inverses)
            .map(|(block, c_inv)| c_inv * (-&block.gm - block.hkm.tr_mul(&kept)))
            .collect();

        Ok(DampedStep { kept, marginal })
    }

    /// Apply `step`, keep it if the cost went down, otherwise restore.
    fn try_step(
        &self,
        problem: &mut Problem,
        layout: &VariableLayout,
        step: &DampedStep,
        cost: f64,
    ) -> Result<StepOutcome, OptimizerError> {
        let saved = Self::apply_step(problem, layout, step)?;
        let new_cost = problem.compute_total_cost()?;

        let change = cost - new_cost;
        let relative = if cost > 0.0 { change.abs() / cost } else { change.abs() };
        let settled = relative < self.cost_tolerance;

        if new_cost.is_finite() && change > 0.0 {
            return Ok(if settled {
                StepOutcome::Converged(new_cost)
            } else {
                StepOutcome::Accepted(new_cost)
            });
        }

        Self::restore(problem, layout, saved)?;
        Ok(if new_cost.is_finite() && settled {
            StepOutcome::Converged(cost)
        } else {
            StepOutcome::Rejected
        })
    }

    /// Move every free variable by its part of `step`. Returns the previous
    /// values, kept variables first, then marginalized ones.
    fn apply_step(
        problem: &mut Problem,
        layout: &VariableLayout,
        step: &DampedStep,
    ) -> Result<Vec<Vec<f64>>, OptimizerError> {
        let kept = step.kept.as_slice();
        let mut saved = Vec::with_capacity(layout.var_names.len() + layout.marginal_names.len());

        for name in &layout.var_names {
            let Some(&Slot::Kept { start, dim }) = layout.slots.get(name) else {
                return Err(ProblemError::VariableNotFound { name: name.clone() }.into());
            };
            let var = problem.variable_mut(name)?;
            let moved = var.kind.retract(&var.values, &kept[start..start + dim])?;
            saved.push(std::mem::replace(&mut var.values, moved));
        }
        for (name, delta) in layout.marginal_names.iter().zip(&step.marginal) {
            let var = problem.variable_mut(name)?;
            let moved = var.kind.retract(&var.values, delta.as_slice())?;
            saved.push(std::mem::replace(&mut var.values, moved));
        }
        Ok(saved)
    }

    fn restore(
        problem: &mut Problem,
        layout: &VariableLayout,
        saved: Vec<Vec<f64>>,
    ) -> Result<(), OptimizerError> {
        let names = layout.var_names.iter().chain(&layout.marginal_names);
        for (name, values) in names.zip(saved) {
            problem.variable_mut(name)?.values = values;
        }
        Ok(())
    }
}
