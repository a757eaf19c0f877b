#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! A small factor graph solver in double precision:
//!
//! - [`Problem`] holds named [`Variable`]s (Euclidean or SE(3)) and boxed [`Factor`]s.
//! - Variables can be held constant ([`Problem::set_fixed`]) or eliminated with the
//!   Schur complement ([`Problem::set_marginalized`]).
//! - [`LevenbergMarquardt`] minimizes the (robustified) sum of squared residuals.
//!
//! # Example
//!
//! ```
//! use wpical_optim::{LevenbergMarquardt, PriorFactor, Problem, Variable};
//!
//! let mut problem = Problem::new();
//! problem.add_variable(Variable::euclidean("x", 2), vec![0.0, 0.0])?;
//! problem.add_factor(Box::new(PriorFactor::new(vec![1.0, -1.0])), vec!["x".into()])?;
//!
//! let result = LevenbergMarquardt::default().optimize(&mut problem)?;
//! assert!(result.final_cost < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod graph;
mod losses;
mod param;
mod solvers;

pub use crate::graph::{
    numeric_linearize, Factor, FactorEntry, FactorError, FactorResult, LinearizationResult,
    PriorFactor, Problem, ProblemError, Variable, VariableType,
};
pub use crate::losses::{CauchyLoss, HuberLoss, IdentityLoss, RobustLoss};
pub use crate::param::{isometry_from_params, isometry_to_params, Param, ParamError};
pub use crate::solvers::{
    LevenbergMarquardt, LinearSystemBuilder, MarginalBlock, NormalEquations, OptimizerError,
    OptimizerResult, OptimizerState, Slot, TerminationReason, VariableLayout,
};
