use std::collections::BTreeMap;

use thiserror::Error;

use super::factor::{Factor, FactorError};
use super::variable::Variable;

#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("Variable '{name}' already exists")]
    DuplicateVariable { name: String },
    #[error("Variable '{name}' not found")]
    VariableNotFound { name: String },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Factor connects marginalized variables '{first}' and '{second}'")]
    MarginalizedCoupling { first: String, second: String },
    #[error("Factor evaluation failed: {0}")]
    FactorEvaluation(#[from] FactorError),
}

/// A factor together with the names of the variables it reads, in order.
pub struct FactorEntry {
    pub factor: Box<dyn Factor>,
    pub variables: Vec<String>,
}

impl FactorEntry {
    /// Robustified cost `rho(|r|^2)` at the current values of `problem`.
    fn cost(&self, problem: &Problem) -> Result<f64, ProblemError> {
        let params = problem.params_of(&self.variables)?;
        let squared_norm = self.factor.linearize(&params, false)?.squared_norm();
        Ok(match self.factor.get_loss() {
            Some(loss) => loss.cost(squared_norm),
            None => squared_norm,
        })
    }
}

/// Named variables and the factors between them.
///
/// Variables are kept ordered by name, so every traversal of the problem
/// (and with it the optimizer's column layout) is deterministic.
#[derive(Default)]
pub struct Problem {
    variables: BTreeMap<String, Variable>,
    factors: Vec<FactorEntry>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `var` starting at `initial_values`.
    pub fn add_variable(&mut self, mut var: Variable, initial_values: Vec<f64>) -> Result<(), ProblemError> {
        if self.variables.contains_key(&var.name) {
            return Err(ProblemError::DuplicateVariable { name: var.name });
        }
        if initial_values.len() != var.global_dim() {
            return Err(ProblemError::DimensionMismatch {
                expected: var.global_dim(),
                actual: initial_values.len(),
            });
        }
        var.values = initial_values;
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Connect `factor` to the named variables. Every name must already exist.
    pub fn add_factor(&mut self, factor: Box<dyn Factor>, variables: Vec<String>) -> Result<(), ProblemError> {
        if variables.len() != factor.num_variables() {
            return Err(ProblemError::DimensionMismatch {
                expected: factor.num_variables(),
                actual: variables.len(),
            });
        }
        if let Some(missing) = variables.iter().find(|n| !self.variables.contains_key(*n)) {
            return Err(ProblemError::VariableNotFound {
                name: missing.clone(),
            });
        }
        self.factors.push(FactorEntry { factor, variables });
        Ok(())
    }

    /// Hold a variable constant.
    pub fn set_fixed(&mut self, name: &str, fixed: bool) -> Result<(), ProblemError> {
        self.variable_mut(name)?.fixed = fixed;
        Ok(())
    }

    /// Eliminate a variable through the Schur complement.
    ///
    /// No factor may connect two marginalized variables. The optimizer
    /// checks this when it lays out the normal equations.
    pub fn set_marginalized(&mut self, name: &str, marginalized: bool) -> Result<(), ProblemError> {
        self.variable_mut(name)?.marginalized = marginalized;
        Ok(())
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.variables.values()
    }

    pub fn variable(&self, name: &str) -> Result<&Variable, ProblemError> {
        self.variables
            .get(name)
            .ok_or_else(|| ProblemError::VariableNotFound {
                name: name.to_string(),
            })
    }

    pub(crate) fn variable_mut(&mut self, name: &str) -> Result<&mut Variable, ProblemError> {
        self.variables
            .get_mut(name)
            .ok_or_else(|| ProblemError::VariableNotFound {
                name: name.to_string(),
            })
    }

    /// Current values of a variable.
    pub fn values(&self, name: &str) -> Result<&[f64], ProblemError> {
        self.variable(name).map(|v| v.values.as_slice())
    }

    pub fn factors(&self) -> &[FactorEntry] {
        &self.factors
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// Sum over factors of the robustified squared residual norm.
    pub fn compute_total_cost(&self) -> Result<f64, ProblemError> {
        self.factors.iter().map(|entry| entry.cost(self)).sum()
    }

    pub(crate) fn params_of(&self, names: &[String]) -> Result<Vec<&[f64]>, ProblemError> {
        names.iter().map(|name| self.values(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PriorFactor;

    fn prior(target: &[f64]) -> Box<dyn Factor> {
        Box::new(PriorFactor::new(target.to_vec()))
    }

    #[test]
    fn test_variables_are_listed_by_name() {
        let mut problem = Problem::new();
        for name in ["pose_b", "intrinsics", "pose_a"] {
            problem.add_variable(Variable::euclidean(name, 1), vec![0.0]).unwrap();
        }
        let names: Vec<&str> = problem.variables().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["intrinsics", "pose_a", "pose_b"]);
    }

    #[test]
    fn test_add_variable_validation() {
        let mut problem = Problem::new();
        let var = Variable::euclidean("k", 2);
        problem.add_variable(var.clone(), vec![1.0, 2.0]).unwrap();
        assert_eq!(problem.values("k").unwrap(), &[1.0, 2.0]);
        assert!(matches!(
            problem.add_variable(var.clone(), vec![1.0, 2.0]),
            Err(ProblemError::DuplicateVariable { .. })
        ));
        assert!(matches!(
            problem.add_variable(Variable::euclidean("j", 2), vec![0.0; 3]),
            Err(ProblemError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_flags_need_an_existing_variable() {
        let mut problem = Problem::new();
        problem.add_variable(Variable::se3("frame"), Variable::se3("frame").values).unwrap();
        problem.set_fixed("frame", true).unwrap();
        problem.set_marginalized("frame", true).unwrap();
        let frame = problem.variable("frame").unwrap();
        assert!(frame.fixed && frame.marginalized);
        assert!(matches!(
            problem.set_fixed("other", true),
            Err(ProblemError::VariableNotFound { .. })
        ));
    }

    #[test]
    fn test_total_cost_sums_factors() {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", 2), vec![3.0, -2.0]).unwrap();
        problem.add_factor(prior(&[4.0, -5.0]), vec!["x".into()]).unwrap();
        problem.add_factor(prior(&[3.0, 0.0]), vec!["x".into()]).unwrap();

        // (1 + 9) + (0 + 4)
        assert!((problem.compute_total_cost().unwrap() - 14.0).abs() < 1e-12);
        assert_eq!(problem.num_factors(), 2);
    }

    #[test]
    fn test_factor_on_unknown_variable_is_rejected() {
        let mut problem = Problem::new();
        match problem.add_factor(prior(&[1.0]), vec!["missing".into()]) {
            Err(ProblemError::VariableNotFound { name }) => assert_eq!(name, "missing"),
            _ => panic!("expected VariableNotFound"),
        }
        assert_eq!(problem.num_factors(), 0);
    }
}
