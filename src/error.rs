use thiserror::Error;

/// Failure modes of the equilibrium engine.
///
/// Solver terminations (converged / budget exhausted / stalled) are *statuses*,
/// not errors; see `optimize::SolverStatus`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EquilibriumError {
    /// Inconsistent or unusable resolution parameters, e.g. a radial
    /// resolution below the poloidal resolution for ANSI indexing, or a grid
    /// too coarse for the basis it is meant to resolve
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// A pipeline or transform product was requested which was never built
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Malformed input text
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// NaN or Inf appeared in a residual evaluation; fatal for the stage
    #[error("non-finite residual: {0}")]
    NonFiniteResidual(String),

    /// A continuation stage failed after its retry
    #[error("continuation stage {stage} failed: {message}")]
    StageFailed { stage: usize, message: String },

    /// Backing LAPACK call failed (singular factorisation, bad dimensions, ...)
    #[error("linear algebra failure: {0}")]
    LinAlg(String),
}

pub type Result<T> = std::result::Result<T, EquilibriumError>;
