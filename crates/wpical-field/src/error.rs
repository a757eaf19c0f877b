use thiserror::Error;
use wpical_optim::OptimizerError;

/// Errors raised while building or solving the tag pose graph.
#[derive(Debug, Error)]
pub enum FieldError {
    /// No frame saw the pinned tag together with another tag.
    #[error("pinned tag {0} is not observed in the pose graph")]
    PinnedTagNotObserved(i32),

    /// Optimizer failure.
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// The solve was cancelled.
    #[error("pose graph solve was cancelled")]
    Cancelled,
}
