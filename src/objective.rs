use crate::basis::Mode;
use crate::compute::{ComputeContext, EnergyBudget, PipelineData, evaluate_energy, evaluate_pipeline};
use crate::equilibrium::EquilibriumState;
use crate::error::{EquilibriumError, Result};
use crate::grid::Grid;
use crate::transform::{Transform, pseudo_inverse};
use ndarray::{Array1, Array2, Axis, concatenate, s};
use ndarray_linalg::SVD;

const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

/// Which scalar the solver drives to a stationary point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    /// weighted force-balance residuals at every collocation node
    ForceBalance,
    /// the MHD energy functional as a single smooth objective
    Energy,
}

/// The linear equality constraints on the packed coefficient vector
/// `y = [R; Z; lambda]`: the rho = 1 surface must match the input boundary,
/// the rho = 0 limit must match the axis, and the constant lambda mode is
/// gauged to zero. Factorised once by SVD into a particular solution plus an
/// orthonormal nullspace, so the solver only ever sees the free directions.
pub struct BoundaryConstraint {
    pub matrix: Array2<f64>,
    pub rhs: Array1<f64>,
    pub particular: Array1<f64>,
    /// orthonormal columns spanning the kernel of `matrix`
    pub nullspace: Array2<f64>,
    pub dim_y: usize,
    pub dim_x: usize,
}

impl BoundaryConstraint {
    pub fn build(state: &EquilibriumState) -> Result<BoundaryConstraint> {
        let nr: usize = state.r_basis.num_modes();
        let nz: usize = state.z_basis.num_modes();
        let nl: usize = state.lambda_basis.num_modes();
        let dim_y: usize = nr + nz + nl;

        let mut rows: Vec<Array1<f64>> = Vec::new();
        let mut rhs_entries: Vec<f64> = Vec::new();

        // boundary surface rows: one per (m, n) family of each coordinate
        let r_edge: Array1<f64> = state.r_basis.radial_values(1.0, 0);
        for (k, mode) in state.boundary_r_basis.modes.iter().enumerate() {
            let mut row: Array1<f64> = Array1::zeros(dim_y);
            for (j, interior) in state.r_basis.modes.iter().enumerate() {
                if interior.m == mode.m && interior.n == mode.n {
                    row[j] = r_edge[j];
                }
            }
            rows.push(row);
            rhs_entries.push(state.boundary_r_mn[k]);
        }
        let z_edge: Array1<f64> = state.z_basis.radial_values(1.0, 0);
        for (k, mode) in state.boundary_z_basis.modes.iter().enumerate() {
            let mut row: Array1<f64> = Array1::zeros(dim_y);
            for (j, interior) in state.z_basis.modes.iter().enumerate() {
                if interior.m == mode.m && interior.n == mode.n {
                    row[nr + j] = z_edge[j];
                }
            }
            rows.push(row);
            rhs_entries.push(state.boundary_z_mn[k]);
        }

        // axis rows: the m = 0 families evaluated at rho = 0
        let r_axis: Array1<f64> = state.r_basis.radial_values(0.0, 0);
        let z_axis: Array1<f64> = state.z_basis.radial_values(0.0, 0);
        for axis in state.axis_inputs.iter() {
            let mut row_r: Array1<f64> = Array1::zeros(dim_y);
            for (j, interior) in state.r_basis.modes.iter().enumerate() {
                if interior.m == 0 && interior.n == axis.n {
                    row_r[j] = r_axis[j];
                }
            }
            if row_r.iter().any(|&v: &f64| v != 0.0) {
                rows.push(row_r);
                rhs_entries.push(axis.r);
            }
            let mut row_z: Array1<f64> = Array1::zeros(dim_y);
            for (j, interior) in state.z_basis.modes.iter().enumerate() {
                if interior.m == 0 && interior.n == axis.n {
                    row_z[nr + j] = z_axis[j];
                }
            }
            if row_z.iter().any(|&v: &f64| v != 0.0) {
                rows.push(row_z);
                rhs_entries.push(axis.z);
            }
        }

        // gauge: lambda has no constant offset
        if let Some(index) = state.lambda_basis.mode_index(Mode { l: 0, m: 0, n: 0 }) {
            let mut row: Array1<f64> = Array1::zeros(dim_y);
            row[nr + nz + index] = 1.0;
            rows.push(row);
            rhs_entries.push(0.0);
        }

        let dim_c: usize = rows.len();
        let mut matrix: Array2<f64> = Array2::zeros((dim_c, dim_y));
        for (i, row) in rows.iter().enumerate() {
            matrix.row_mut(i).assign(row);
        }
        let rhs: Array1<f64> = Array1::from(rhs_entries);

        // minimum-norm particular solution and the kernel, from one SVD
        let particular: Array1<f64> = pseudo_inverse(&matrix)?.dot(&rhs);
        let (_, singular, vt_opt) = matrix.svd(false, true).map_err(|e| EquilibriumError::LinAlg(e.to_string()))?;
        let vt: Array2<f64> = vt_opt.ok_or_else(|| EquilibriumError::LinAlg("SVD did not return V^T".to_string()))?;
        let cutoff: f64 = f64::EPSILON * dim_c.max(dim_y) as f64 * singular.iter().cloned().fold(0.0, f64::max);
        let rank: usize = singular.iter().filter(|&&s: &&f64| s > cutoff).count();
        let dim_x: usize = dim_y - rank;
        let nullspace: Array2<f64> = vt.slice(s![rank.., ..]).t().to_owned();

        return Ok(BoundaryConstraint {
            matrix,
            rhs,
            particular,
            nullspace,
            dim_y,
            dim_x,
        });
    }

    /// Coordinates of `y` in the free (unconstrained) directions.
    pub fn project(&self, y: &Array1<f64>) -> Array1<f64> {
        return self.nullspace.t().dot(&(y - &self.particular));
    }

    /// The full coefficient vector for free coordinates `x`; satisfies the
    /// constraints for any `x`.
    pub fn recover(&self, x: &Array1<f64>) -> Array1<f64> {
        return &self.particular + &self.nullspace.dot(x);
    }
}

/// Jacobian provider for the solver; keeps the objective agnostic about how
/// derivatives are obtained.
pub trait Differentiator {
    fn jacobian_of(&self, f: &dyn Fn(&Array1<f64>) -> Result<Array1<f64>>, x: &Array1<f64>) -> Result<Array2<f64>>;
}

/// Forward finite differences with a relative step.
pub struct ForwardDifference {
    pub rel_step: f64,
}

impl Default for ForwardDifference {
    fn default() -> ForwardDifference {
        return ForwardDifference {
            rel_step: f64::EPSILON.sqrt(),
        };
    }
}

impl Differentiator for ForwardDifference {
    fn jacobian_of(&self, f: &dyn Fn(&Array1<f64>) -> Result<Array1<f64>>, x: &Array1<f64>) -> Result<Array2<f64>> {
        let f0: Array1<f64> = f(x)?;
        let mut jacobian: Array2<f64> = Array2::zeros((f0.len(), x.len()));
        for j in 0..x.len() {
            let h: f64 = self.rel_step * x[j].abs().max(1.0);
            let mut x_step: Array1<f64> = x.clone();
            x_step[j] += h;
            let f_step: Array1<f64> = f(&x_step)?;
            let column: Array1<f64> = (f_step - &f0) / h;
            jacobian.column_mut(j).assign(&column);
        }
        return Ok(jacobian);
    }
}

/// The residual function handed to the least-squares solver: fixed transforms
/// and constraint factorisation, with the free coefficient vector as the only
/// argument.
pub struct ObjectiveFunction {
    pub kind: ObjectiveKind,
    pub constraint: BoundaryConstraint,
    r_transform: Transform,
    z_transform: Transform,
    lambda_transform: Transform,
    profile_transform: Transform,
    grid: Grid,
    psi: f64,
    pressure_l: Array1<f64>,
    iota_l: Array1<f64>,
    scale: f64,
    diff: Box<dyn Differentiator + Send + Sync>,
}

impl ObjectiveFunction {
    pub fn new(
        kind: ObjectiveKind,
        state: &EquilibriumState,
        grid: &Grid,
        diff: Box<dyn Differentiator + Send + Sync>,
    ) -> Result<ObjectiveFunction> {
        let r_transform: Transform = Transform::new(grid, &state.r_basis, 2, false)?;
        let z_transform: Transform = Transform::new(grid, &state.z_basis, 2, false)?;
        let lambda_transform: Transform = Transform::new(grid, &state.lambda_basis, 2, false)?;
        let profile_transform: Transform = Transform::new(grid, &state.profile_basis, 1, false)?;
        let constraint: BoundaryConstraint = BoundaryConstraint::build(state)?;

        let mut objective: ObjectiveFunction = ObjectiveFunction {
            kind,
            constraint,
            r_transform,
            z_transform,
            lambda_transform,
            profile_transform,
            grid: grid.clone(),
            psi: state.psi,
            pressure_l: state.pressure_l.clone(),
            iota_l: state.iota_l.clone(),
            scale: 1.0,
            diff,
        };

        // normalise the force residual by the volume-averaged pressure
        // gradient of the initial state; a magnetic-pressure scale stands in
        // for vacuum profiles
        let (r_lmn, z_lmn, lambda_mn) = objective.split(&state.pack_state());
        let data: PipelineData = objective.pipeline(&r_lmn, &z_lmn, &lambda_mn)?;
        let dv: Array1<f64> = data.jacobian.g.mapv(f64::abs) * &objective.grid.weights;
        let volume: f64 = dv.sum();
        let mean_pressure_gradient: f64 = (&data.force.pressure_gradient_mag * &dv).sum() / volume;
        objective.scale = if mean_pressure_gradient > 1e-12 {
            mean_pressure_gradient
        } else {
            objective.psi.powi(2) / MU_0
        };

        return Ok(objective);
    }

    pub fn dim_x(&self) -> usize {
        return self.constraint.dim_x;
    }

    /// Number of residual entries this objective produces.
    pub fn residual_len(&self) -> usize {
        match self.kind {
            ObjectiveKind::ForceBalance => return 2 * self.grid.num_nodes,
            ObjectiveKind::Energy => return 1,
        }
    }

    /// The normalisation applied to every residual entry.
    pub fn scale(&self) -> f64 {
        return self.scale;
    }

    /// Free coordinates of the state's current coefficients.
    pub fn initial_x(&self, state: &EquilibriumState) -> Array1<f64> {
        return self.constraint.project(&state.pack_state());
    }

    fn split(&self, y: &Array1<f64>) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let nr: usize = self.r_transform.basis.num_modes();
        let nz: usize = self.z_transform.basis.num_modes();
        let r_lmn: Array1<f64> = y.slice(s![0..nr]).to_owned();
        let z_lmn: Array1<f64> = y.slice(s![nr..nr + nz]).to_owned();
        let lambda_mn: Array1<f64> = y.slice(s![nr + nz..]).to_owned();
        return (r_lmn, z_lmn, lambda_mn);
    }

    fn pipeline(&self, r_lmn: &Array1<f64>, z_lmn: &Array1<f64>, lambda_mn: &Array1<f64>) -> Result<PipelineData> {
        let ctx: ComputeContext = ComputeContext {
            r_transform: &self.r_transform,
            z_transform: &self.z_transform,
            lambda_transform: &self.lambda_transform,
            profile_transform: &self.profile_transform,
            grid: &self.grid,
            psi: self.psi,
            pressure_l: &self.pressure_l,
            iota_l: &self.iota_l,
            r_lmn,
            z_lmn,
            lambda_mn,
        };
        return evaluate_pipeline(&ctx);
    }

    /// Residual vector at free coordinates `x`. Force balance yields two
    /// weighted entries per collocation node; energy a single entry.
    pub fn residual(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        let y: Array1<f64> = self.constraint.recover(x);
        let (r_lmn, z_lmn, lambda_mn) = self.split(&y);

        let residual: Array1<f64> = match self.kind {
            ObjectiveKind::ForceBalance => {
                let data: PipelineData = self.pipeline(&r_lmn, &z_lmn, &lambda_mn)?;
                let dv: Array1<f64> = data.jacobian.g.mapv(f64::abs) * &self.grid.weights;
                let f_rho: Array1<f64> = &data.force.f_rho * &data.contravariant.grad_rho_mag * &dv / self.scale;
                let f_beta: Array1<f64> = &data.force.f_beta * &data.force.beta_mag * &dv / self.scale;
                concatenate(Axis(0), &[f_rho.view(), f_beta.view()]).map_err(|e| EquilibriumError::LinAlg(e.to_string()))?
            }
            ObjectiveKind::Energy => {
                let ctx: ComputeContext = ComputeContext {
                    r_transform: &self.r_transform,
                    z_transform: &self.z_transform,
                    lambda_transform: &self.lambda_transform,
                    profile_transform: &self.profile_transform,
                    grid: &self.grid,
                    psi: self.psi,
                    pressure_l: &self.pressure_l,
                    iota_l: &self.iota_l,
                    r_lmn: &r_lmn,
                    z_lmn: &z_lmn,
                    lambda_mn: &lambda_mn,
                };
                let energy: EnergyBudget = evaluate_energy(&ctx)?;
                Array1::from(vec![energy.total])
            }
        };

        if residual.iter().any(|v: &f64| !v.is_finite()) {
            return Err(EquilibriumError::NonFiniteResidual(
                "objective residual contains NaN or Inf".to_string(),
            ));
        }
        return Ok(residual);
    }

    /// Half the squared residual norm.
    pub fn cost(&self, x: &Array1<f64>) -> Result<f64> {
        let f: Array1<f64> = self.residual(x)?;
        return Ok(0.5 * f.dot(&f));
    }

    pub fn jacobian(&self, x: &Array1<f64>) -> Result<Array2<f64>> {
        return self.diff.jacobian_of(&|point: &Array1<f64>| self.residual(point), x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::SpectralIndexing;
    use crate::equilibrium::{AxisInput, BoundaryInput, ProfileInput};
    use crate::grid::NodePattern;
    use approx::assert_abs_diff_eq;

    fn solovev_state() -> EquilibriumState {
        let profiles: Vec<ProfileInput> = vec![
            ProfileInput { l: 0, pressure: 0.125, iota: 1.0 },
            ProfileInput { l: 2, pressure: -0.125, iota: 0.0 },
        ];
        let boundary: Vec<BoundaryInput> = vec![
            BoundaryInput { m: 0, n: 0, r: 3.999, z: 0.0 },
            BoundaryInput { m: 1, n: 0, r: 1.026, z: 0.0 },
            BoundaryInput { m: -1, n: 0, r: 0.0, z: 1.58 },
            BoundaryInput { m: 2, n: 0, r: -0.068, z: 0.0 },
            BoundaryInput { m: -2, n: 0, r: 0.0, z: 0.01 },
        ];
        let axis: Vec<AxisInput> = vec![AxisInput { n: 0, r: 4.0, z: 0.0 }];
        return EquilibriumState::new(true, 1.0, 1.0, 6, 6, 0, SpectralIndexing::Ansi, profiles, boundary, axis, 1.0, 1.0).unwrap();
    }

    #[test]
    fn test_recover_always_satisfies_the_constraints() {
        let state: EquilibriumState = solovev_state();
        let constraint: BoundaryConstraint = BoundaryConstraint::build(&state).unwrap();
        assert!(constraint.dim_x < constraint.dim_y);

        // arbitrary free coordinates still satisfy A y = b
        let mut x: Array1<f64> = Array1::zeros(constraint.dim_x);
        for j in 0..x.len() {
            x[j] = (1.3 * j as f64 - 0.4).cos();
        }
        let y: Array1<f64> = constraint.recover(&x);
        let residual: Array1<f64> = constraint.matrix.dot(&y) - &constraint.rhs;
        for i in 0..residual.len() {
            assert_abs_diff_eq!(residual[i], 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_project_recover_roundtrip_on_feasible_state() {
        // the initial guess satisfies the boundary and axis constraints, so
        // projecting and recovering must reproduce it
        let state: EquilibriumState = solovev_state();
        let constraint: BoundaryConstraint = BoundaryConstraint::build(&state).unwrap();
        let y: Array1<f64> = state.pack_state();
        let y_cycled: Array1<f64> = constraint.recover(&constraint.project(&y));
        for j in 0..y.len() {
            assert_abs_diff_eq!(y_cycled[j], y[j], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_force_residual_is_finite_and_jacobian_has_full_shape() {
        let state: EquilibriumState = solovev_state();
        let grid: Grid = Grid::new(6, 0, 1.0, NodePattern::Jacobi).unwrap();
        let objective: ObjectiveFunction =
            ObjectiveFunction::new(ObjectiveKind::ForceBalance, &state, &grid, Box::new(ForwardDifference::default())).unwrap();
        let x: Array1<f64> = objective.initial_x(&state);
        let f: Array1<f64> = objective.residual(&x).unwrap();
        assert_eq!(f.len(), 2 * grid.num_nodes);
        assert!(f.iter().all(|v: &f64| v.is_finite()));

        let jacobian: Array2<f64> = objective.jacobian(&x).unwrap();
        assert_eq!(jacobian.dim(), (2 * grid.num_nodes, objective.dim_x()));
        assert!(jacobian.iter().all(|v: &f64| v.is_finite()));
    }

    #[test]
    fn test_energy_objective_is_scalar() {
        let state: EquilibriumState = solovev_state();
        let grid: Grid = Grid::new(6, 0, 1.0, NodePattern::Quad).unwrap();
        let objective: ObjectiveFunction =
            ObjectiveFunction::new(ObjectiveKind::Energy, &state, &grid, Box::new(ForwardDifference::default())).unwrap();
        let x: Array1<f64> = objective.initial_x(&state);
        let f: Array1<f64> = objective.residual(&x).unwrap();
        assert_eq!(f.len(), 1);
        assert!(f[0].is_finite());
        // magnetic energy dominates this low-pressure configuration
        assert!(f[0] > 0.0);
    }

    #[test]
    fn test_finite_difference_jacobian_of_linear_map() {
        // the FD jacobian of an affine map is the map itself
        let a: Array2<f64> = Array2::from_shape_vec((3, 2), vec![2.0, -1.0, 0.5, 3.0, 1.0, 1.0]).unwrap();
        let a_closure: Array2<f64> = a.clone();
        let f = move |x: &Array1<f64>| -> Result<Array1<f64>> { Ok(a_closure.dot(x) + 5.0) };
        let x0: Array1<f64> = Array1::from(vec![0.3, -0.7]);
        let diff: ForwardDifference = ForwardDifference::default();
        let jacobian: Array2<f64> = diff.jacobian_of(&f, &x0).unwrap();
        for i in 0..3 {
            for j in 0..2 {
                assert_abs_diff_eq!(jacobian[[i, j]], a[[i, j]], epsilon = 1e-6);
            }
        }
    }
}
