use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use super::OptimizerError;
use crate::graph::{FactorError, Problem, ProblemError};

/// Where the tangent columns of a variable live in the normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Columns `start..start + dim` of the reduced (kept) system.
    Kept { start: usize, dim: usize },
    /// Own diagonal block, eliminated by the Schur complement.
    Marginal { block: usize, dim: usize },
    /// Held constant, no columns.
    Fixed,
}

/// Column layout of a problem: which variables are solved directly, which
/// are eliminated, and where each one's columns go.
#[derive(Debug, Clone)]
pub struct VariableLayout {
    /// Kept variables in column order.
    pub var_names: Vec<String>,
    /// Marginalized variables in block order.
    pub marginal_names: Vec<String>,
    pub slots: HashMap<String, Slot>,
    /// Size of the reduced system.
    pub total_local_dim: usize,
}

impl VariableLayout {
    pub fn from_problem(problem: &Problem) -> Result<Self, ProblemError> {
        let mut layout = Self {
            var_names: Vec::new(),
            marginal_names: Vec::new(),
            slots: HashMap::with_capacity(problem.num_variables()),
            total_local_dim: 0,
        };

        // problem variables iterate in name order
        for var in problem.variables() {
            let dim = var.local_dim();
            let slot = if var.fixed {
                Slot::Fixed
            } else if var.marginalized {
                layout.marginal_names.push(var.name.clone());
                Slot::Marginal {
                    block: layout.marginal_names.len() - 1,
                    dim,
                }
            } else {
                layout.var_names.push(var.name.clone());
                layout.total_local_dim += dim;
                Slot::Kept {
                    start: layout.total_local_dim - dim,
                    dim,
                }
            };
            layout.slots.insert(var.name.clone(), slot);
        }

        for entry in problem.factors() {
            let marginal: Vec<&String> = entry
                .variables
                .iter()
                .filter(|name| matches!(layout.slots.get(*name), Some(Slot::Marginal { .. })))
                .collect();
            if let Some(pair) = marginal.windows(2).find(|pair| pair[0] != pair[1]) {
                return Err(ProblemError::MarginalizedCoupling {
                    first: pair[0].clone(),
                    second: pair[1].clone(),
                });
            }
        }

        Ok(layout)
    }

    /// Number of free tangent dimensions, kept and marginalized.
    pub fn free_local_dim(&self) -> usize {
        let marginal: usize = self
            .slots
            .values()
            .map(|slot| match slot {
                Slot::Marginal { dim, .. } => *dim,
                _ => 0,
            })
            .sum();
        self.total_local_dim + marginal
    }

    fn slot(&self, name: &str) -> Result<Slot, ProblemError> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| ProblemError::VariableNotFound {
                name: name.to_string(),
            })
    }
}

/// Normal equations of one marginalized variable `m`:
/// its diagonal block `H_mm`, the coupling `H_km` to the kept system and `g_m`.
#[derive(Debug, Clone)]
pub struct MarginalBlock {
    pub hmm: DMatrix<f64>,
    pub hkm: DMatrix<f64>,
    pub gm: DVector<f64>,
}

/// Gauss-Newton normal equations split into a kept part and marginal blocks.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    /// `J_k^T J_k`
    pub jtj: DMatrix<f64>,
    /// `J_k^T r`
    pub jtr: DVector<f64>,
    /// One block per marginalized variable, in layout order.
    pub blocks: Vec<MarginalBlock>,
}

impl NormalEquations {
    fn zeros(problem: &Problem, layout: &VariableLayout) -> Result<Self, ProblemError> {
        let k = layout.total_local_dim;
        let blocks = layout
            .marginal_names
            .iter()
            .map(|name| {
                let dim = problem.variable(name)?.local_dim();
                Ok(MarginalBlock {
                    hmm: DMatrix::zeros(dim, dim),
                    hkm: DMatrix::zeros(k, dim),
                    gm: DVector::zeros(dim),
                })
            })
            .collect::<Result<_, ProblemError>>()?;
        Ok(Self {
            jtj: DMatrix::zeros(k, k),
            jtr: DVector::zeros(k),
            blocks,
        })
    }

    /// Norm of the full gradient, kept and marginalized.
    pub fn gradient_norm(&self) -> f64 {
        let marginal: f64 = self.blocks.iter().map(|b| b.gm.norm_squared()).sum();
        (self.jtr.norm_squared() + marginal).sqrt()
    }
}

/// Accumulates `J^T J` and `J^T r` factor by factor.
pub struct LinearSystemBuilder;

impl LinearSystemBuilder {
    pub fn build(
        problem: &Problem,
        layout: &VariableLayout,
    ) -> Result<NormalEquations, OptimizerError> {
        let mut neq = NormalEquations::zeros(problem, layout)?;

        for entry in problem.factors() {
            let params = problem.params_of(&entry.variables)?;
            let result = entry.factor.linearize(&params, true)?;
            let Some(jacobian) = result.jacobian.as_ref() else {
                return Err(FactorError::JacobianFailed("factor returned no Jacobian".into()).into());
            };

            // (slot, first column in the factor Jacobian)
            let mut columns = Vec::with_capacity(entry.variables.len());
            let mut offset = 0;
            for name in &entry.variables {
                columns.push((layout.slot(name)?, offset));
                offset += problem.variable(name)?.local_dim();
            }
            if jacobian.shape() != (result.residual.len(), offset) {
                return Err(FactorError::DimensionMismatch {
                    expected: offset,
                    actual: jacobian.ncols(),
                }
                .into());
            }

            // IRLS: scale rows by sqrt(rho'(|r|^2))
            let w = match entry.factor.get_loss() {
                Some(loss) => loss.weight(result.squared_norm()).sqrt(),
                None => 1.0,
            };
            let jw = jacobian * w;
            let rw = &result.residual * w;

            for &(slot_i, off_i) in &columns {
                let dim_i = match slot_i {
                    Slot::Kept { dim, .. } | Slot::Marginal { dim, .. } => dim,
                    Slot::Fixed => continue,
                };
                let ji = jw.columns(off_i, dim_i);
                let gi = ji.tr_mul(&rw);

                match slot_i {
                    Slot::Kept { start, dim } => {
                        let mut g = neq.jtr.rows_mut(start, dim);
                        g += &gi;
                    }
                    Slot::Marginal { block, .. } => neq.blocks[block].gm += &gi,
                    Slot::Fixed => {}
                }

                for &(slot_j, off_j) in &columns {
                    match (slot_i, slot_j) {
                        (Slot::Kept { start: si, dim: di }, Slot::Kept { start: sj, dim: dj }) => {
                            let h = ji.tr_mul(&jw.columns(off_j, dj));
                            let mut target = neq.jtj.view_mut((si, sj), (di, dj));
                            target += &h;
                        }
                        (Slot::Kept { start: si, dim: di }, Slot::Marginal { block, dim: dj }) => {
                            let h = ji.tr_mul(&jw.columns(off_j, dj));
                            let mut target = neq.blocks[block].hkm.view_mut((si, 0), (di, dj));
                            target += &h;
                        }
                        (Slot::Marginal { block: bi, .. }, Slot::Marginal { block: bj, dim: dj })
                            if bi == bj =>
                        {
                            neq.blocks[bi].hmm += ji.tr_mul(&jw.columns(off_j, dj));
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(neq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PriorFactor, Variable};

    #[test]
    fn test_layout_slots() {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("a", 2), vec![0.0; 2]).unwrap();
        problem.add_variable(Variable::euclidean("b", 3), vec![0.0; 3]).unwrap();
        problem.add_variable(Variable::se3("c"), Variable::se3("c").values).unwrap();
        problem.add_variable(Variable::euclidean("d", 1), vec![0.0]).unwrap();
        problem.set_fixed("b", true).unwrap();
        problem.set_marginalized("c", true).unwrap();

        let layout = VariableLayout::from_problem(&problem).unwrap();
        assert_eq!(layout.var_names, vec!["a".to_string(), "d".to_string()]);
        assert_eq!(layout.marginal_names, vec!["c".to_string()]);
        assert_eq!(layout.total_local_dim, 3);
        assert_eq!(layout.free_local_dim(), 9);
        assert_eq!(layout.slots["a"], Slot::Kept { start: 0, dim: 2 });
        assert_eq!(layout.slots["b"], Slot::Fixed);
        assert_eq!(layout.slots["c"], Slot::Marginal { block: 0, dim: 6 });
        assert_eq!(layout.slots["d"], Slot::Kept { start: 2, dim: 1 });
    }

    #[test]
    fn test_prior_normal_equations() {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", 2), vec![1.0, 1.0]).unwrap();
        problem
            .add_factor(Box::new(PriorFactor::new(vec![0.0, 3.0])), vec!["x".into()])
            .unwrap();

        let layout = VariableLayout::from_problem(&problem).unwrap();
        let neq = LinearSystemBuilder::build(&problem, &layout).unwrap();
        assert_eq!(neq.jtj, DMatrix::identity(2, 2));
        assert_eq!(neq.jtr, DVector::from_vec(vec![1.0, -2.0]));
        assert!(neq.blocks.is_empty());
        assert!((neq.gradient_norm() - 5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_marginal_prior_fills_its_own_block() {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("m", 2), vec![2.0, 0.0]).unwrap();
        problem.set_marginalized("m", true).unwrap();
        problem
            .add_factor(Box::new(PriorFactor::new(vec![0.0, 0.0])), vec!["m".into()])
            .unwrap();

        let layout = VariableLayout::from_problem(&problem).unwrap();
        let neq = LinearSystemBuilder::build(&problem, &layout).unwrap();
        assert_eq!(neq.jtj.shape(), (0, 0));
        assert_eq!(neq.blocks[0].hmm, DMatrix::identity(2, 2));
        assert_eq!(neq.blocks[0].gm, DVector::from_vec(vec![2.0, 0.0]));
    }
}
