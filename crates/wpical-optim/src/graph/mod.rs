mod factor;
mod problem;
mod variable;

pub use factor::{
    numeric_linearize, Factor, FactorError, FactorResult, LinearizationResult, PriorFactor,
};
pub use problem::{FactorEntry, Problem, ProblemError};
pub use variable::{Variable, VariableType};
