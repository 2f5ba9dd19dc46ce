use super::fields::{CurrentDensity, FluxSurfaceProfiles, MagneticField};
use super::geometry::{ContravariantBasis, JacobianTerms};
use super::Vec3;
use crate::grid::Grid;
use ndarray::Array1;

const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

/// The force-balance error F = J x B - grad p, split into its radial
/// component and the helical component along beta = B^zeta grad theta -
/// B^theta grad zeta (the two directions J x B can point in).
pub struct ForceBalance {
    /// g (J^theta B^zeta - J^zeta B^theta) - p_r
    pub f_rho: Array1<f64>,
    /// -g J^rho
    pub f_beta: Array1<f64>,
    pub f_vec: Vec3,
    pub f_mag: Array1<f64>,
    pub beta_mag: Array1<f64>,
    /// |p_r| |grad rho|, the natural normalisation of the force error
    pub pressure_gradient_mag: Array1<f64>,
}

/// Magnetic and thermal contributions to the MHD energy functional
/// W = int |B|^2 / (2 mu0) dV - int p dV.
#[derive(Debug, Clone, Copy)]
pub struct EnergyBudget {
    pub magnetic: f64,
    pub pressure: f64,
    pub total: f64,
}

pub fn compute_force_balance(
    profiles: &FluxSurfaceProfiles,
    jacobian: &JacobianTerms,
    contravariant: &ContravariantBasis,
    field: &MagneticField,
    current: &CurrentDensity,
) -> ForceBalance {
    let f_rho: Array1<f64> =
        &jacobian.g * (&current.j_sup_theta * &field.b_sup_zeta - &current.j_sup_zeta * &field.b_sup_theta) - &profiles.pressure_r;
    let f_beta: Array1<f64> = -(&jacobian.g * &current.j_sup_rho);

    let beta_vec: Vec3 = contravariant
        .e_sup_theta
        .scale(&field.b_sup_zeta)
        .sub(&contravariant.e_sup_zeta.scale(&field.b_sup_theta));
    let f_vec: Vec3 = contravariant.e_sup_rho.scale(&f_rho).add(&beta_vec.scale(&f_beta));

    let f_mag: Array1<f64> = f_vec.norm();
    let beta_mag: Array1<f64> = beta_vec.norm();
    let pressure_gradient_mag: Array1<f64> = profiles.pressure_r.mapv(f64::abs) * &contravariant.grad_rho_mag;

    return ForceBalance {
        f_rho,
        f_beta,
        f_vec,
        f_mag,
        beta_mag,
        pressure_gradient_mag,
    };
}

pub fn compute_energy(profiles: &FluxSurfaceProfiles, field: &MagneticField, jacobian: &JacobianTerms, grid: &Grid) -> EnergyBudget {
    let dv: Array1<f64> = jacobian.g.mapv(f64::abs) * &grid.weights;
    let magnetic: f64 = (&field.b_mag * &field.b_mag * &dv).sum() / (2.0 * MU_0);
    let pressure: f64 = -(&profiles.pressure * &dv).sum();
    return EnergyBudget {
        magnetic,
        pressure,
        total: magnetic + pressure,
    };
}

#[cfg(test)]
mod tests {
    use super::super::{ComputeContext, PipelineData, evaluate_pipeline};
    use super::*;
    use crate::basis::SpectralIndexing;
    use crate::equilibrium::{AxisInput, BoundaryInput, EquilibriumState, ProfileInput};
    use crate::grid::{Grid, NodePattern};
    use crate::transform::Transform;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn circular_state(r0: f64, a: f64, p0: f64, iota: f64) -> EquilibriumState {
        let boundary: Vec<BoundaryInput> = vec![
            BoundaryInput { m: 0, n: 0, r: r0, z: 0.0 },
            BoundaryInput { m: 1, n: 0, r: a, z: 0.0 },
            BoundaryInput { m: -1, n: 0, r: 0.0, z: a },
        ];
        let profiles: Vec<ProfileInput> = vec![
            ProfileInput { l: 0, pressure: p0, iota },
            ProfileInput { l: 2, pressure: -p0, iota: 0.0 },
        ];
        let axis: Vec<AxisInput> = vec![AxisInput { n: 0, r: r0, z: 0.0 }];
        return EquilibriumState::new(true, 1.0, 1.0, 2, 2, 0, SpectralIndexing::Ansi, profiles, boundary, axis, 1.0, 1.0).unwrap();
    }

    fn run_pipeline(state: &EquilibriumState, grid: &Grid) -> PipelineData {
        let r_transform: Transform = Transform::new(grid, &state.r_basis, 2, false).unwrap();
        let z_transform: Transform = Transform::new(grid, &state.z_basis, 2, false).unwrap();
        let lambda_transform: Transform = Transform::new(grid, &state.lambda_basis, 2, false).unwrap();
        let profile_transform: Transform = Transform::new(grid, &state.profile_basis, 1, false).unwrap();
        let ctx: ComputeContext = ComputeContext {
            r_transform: &r_transform,
            z_transform: &z_transform,
            lambda_transform: &lambda_transform,
            profile_transform: &profile_transform,
            grid,
            psi: state.psi,
            pressure_l: &state.pressure_l,
            iota_l: &state.iota_l,
            r_lmn: &state.r_lmn,
            z_lmn: &state.z_lmn,
            lambda_mn: &state.lambda_mn,
        };
        return evaluate_pipeline(&ctx).unwrap();
    }

    #[test]
    fn test_force_error_is_perpendicular_to_the_field() {
        // F = J x B - grad p and both terms are orthogonal to B, since B is
        // tangent to the constant-pressure surfaces
        let state: EquilibriumState = circular_state(4.0, 1.0, 1000.0, 0.9);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let data: PipelineData = run_pipeline(&state, &grid);
        let f_dot_b: ndarray::Array1<f64> = data.force.f_vec.dot(&data.field.b_vec);
        for i in 0..grid.num_nodes {
            let scale: f64 = data.force.f_mag[i] * data.field.b_mag[i] + 1.0;
            assert_abs_diff_eq!(f_dot_b[i] / scale, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_energy_of_uniform_toroidal_field() {
        // iota = 0 leaves only the toroidal field B0 = Psi / (pi a^2), so
        // W_B = B0^2 / (2 mu0) * 2 pi^2 a^2 R0 and
        // W_p = -p0 pi^2 a^2 R0 for p = p0 (1 - rho^2)
        let r0: f64 = 3.5;
        let a: f64 = 0.8;
        let p0: f64 = 1000.0;
        let state: EquilibriumState = circular_state(r0, a, p0, 0.0);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Quad).unwrap();
        let data: PipelineData = run_pipeline(&state, &grid);
        let energy: EnergyBudget = compute_energy(&data.profiles, &data.field, &data.jacobian, &grid);

        let pi: f64 = std::f64::consts::PI;
        let b0: f64 = state.psi / (pi * a * a);
        let volume: f64 = 2.0 * pi * pi * a * a * r0;
        assert_relative_eq!(energy.magnetic, b0 * b0 / (2.0 * MU_0) * volume, max_relative = 1e-10);
        assert_relative_eq!(energy.pressure, -p0 * pi * pi * a * a * r0, max_relative = 1e-10);
        assert_abs_diff_eq!(energy.total, energy.magnetic + energy.pressure, epsilon = 1e-9);
    }

    #[test]
    fn test_force_error_uses_the_pressure_gradient_scale() {
        let state: EquilibriumState = circular_state(4.0, 1.0, 500.0, 0.8);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let data: PipelineData = run_pipeline(&state, &grid);
        for i in 0..grid.num_nodes {
            let rho: f64 = grid.nodes[[i, 0]];
            // p = p0 (1 - rho^2) with |grad rho| = 1/a gives |p_r| |grad rho| = 1000 rho
            assert_relative_eq!(data.force.pressure_gradient_mag[i], 1000.0 * rho, max_relative = 1e-9);
        }
    }
}
