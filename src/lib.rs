//! Inverse spectral solver for 3-D ideal-MHD equilibria.
//!
//! The plasma state is the flux-coordinate mapping (R, Z)(rho, theta, zeta)
//! plus a poloidal stream function lambda, expanded in Fourier–Zernike /
//! double-Fourier bases. A trust-region least-squares solver drives the
//! J x B - grad p force-balance residuals (or the MHD energy functional) to
//! zero over the free spectral coefficients, with the last closed flux
//! surface held fixed through a nullspace projection. A continuation driver
//! walks a family of such solves from an easy configuration to the requested
//! one, ramping resolution, 3-D shaping and pressure.

pub mod basis;
pub mod compute;
pub mod continuation;
pub mod equilibrium;
pub mod error;
pub mod grid;
pub mod inputs;
pub mod objective;
pub mod optimize;
pub mod perturbations;
pub mod transform;

pub use basis::{Mode, SpectralBasis, SpectralIndexing, Symmetry};
pub use continuation::{ContinuationResult, ContinuationStatus, solve_continuation};
pub use equilibrium::{AxisInput, BoundaryInput, EquilibriumState, Profile, ProfileInput};
pub use error::{EquilibriumError, Result};
pub use grid::{Grid, NodePattern};
pub use inputs::{InputConfig, PerStage, StageConfig};
pub use objective::{BoundaryConstraint, Differentiator, ForwardDifference, ObjectiveFunction, ObjectiveKind};
pub use optimize::{OptimizerMethod, SolverOptions, SolverResult, SolverStatus};
pub use transform::Transform;
