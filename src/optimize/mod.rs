pub mod least_squares;
pub mod subproblems;

pub use least_squares::{OptimizerMethod, SolverOptions, SolverResult, SolverStatus, least_squares};
