use super::geometry::{CovariantBasis, JacobianTerms, ToroidalCoords};
use super::{ComputeContext, Vec3};
use crate::error::Result;
use ndarray::Array1;

const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;
const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

/// Flux-surface quantities on the grid: the toroidal flux derivative and the
/// pressure / rotational-transform power series.
pub struct FluxSurfaceProfiles {
    pub psi_r: Array1<f64>,
    pub psi_rr: Array1<f64>,
    pub pressure: Array1<f64>,
    pub pressure_r: Array1<f64>,
    pub iota: Array1<f64>,
    pub iota_r: Array1<f64>,
}

/// The magnetic field in flux coordinates: contravariant components from the
/// flux functions, covariant components through the metric, and the six
/// covariant-component derivatives the curl needs.
pub struct MagneticField {
    pub b_sup_theta: Array1<f64>,
    pub b_sup_zeta: Array1<f64>,
    pub b_vec: Vec3,
    pub b_mag: Array1<f64>,
    pub b_sub_rho: Array1<f64>,
    pub b_sub_theta: Array1<f64>,
    pub b_sub_zeta: Array1<f64>,
    pub b_sub_rho_t: Array1<f64>,
    pub b_sub_rho_z: Array1<f64>,
    pub b_sub_theta_r: Array1<f64>,
    pub b_sub_theta_z: Array1<f64>,
    pub b_sub_zeta_r: Array1<f64>,
    pub b_sub_zeta_t: Array1<f64>,
}

/// Contravariant plasma current density from Ampere's law.
pub struct CurrentDensity {
    pub j_sup_rho: Array1<f64>,
    pub j_sup_theta: Array1<f64>,
    pub j_sup_zeta: Array1<f64>,
}

/// Evaluate psi(rho) = Psi rho^2 and the input profiles on the grid.
pub fn compute_profiles(ctx: &ComputeContext) -> Result<FluxSurfaceProfiles> {
    let rho: Array1<f64> = ctx.grid.nodes.column(0).to_owned();
    let psi_r: Array1<f64> = 2.0 * ctx.psi * &rho;
    let psi_rr: Array1<f64> = Array1::from_elem(rho.len(), 2.0 * ctx.psi);
    return Ok(FluxSurfaceProfiles {
        psi_r,
        psi_rr,
        pressure: ctx.profile_transform.transform(ctx.pressure_l, 0, 0, 0)?,
        pressure_r: ctx.profile_transform.transform(ctx.pressure_l, 1, 0, 0)?,
        iota: ctx.profile_transform.transform(ctx.iota_l, 0, 0, 0)?,
        iota_r: ctx.profile_transform.transform(ctx.iota_l, 1, 0, 0)?,
    });
}

/// B = psi_r [ (iota - lambda_zeta) e_theta + (1 + lambda_theta) e_zeta ] / (2 pi g).
///
/// The derivative fields follow from the product rule; lambda carries no
/// radial dependence, so only iota and psi contribute radially to the
/// numerators.
pub fn compute_magnetic_field(
    profiles: &FluxSurfaceProfiles,
    coords: &ToroidalCoords,
    basis: &CovariantBasis,
    jacobian: &JacobianTerms,
) -> MagneticField {
    let g: &Array1<f64> = &jacobian.g;
    let two_pi_g: Array1<f64> = TWO_PI * g;

    let num_theta: Array1<f64> = &profiles.iota - &coords.lambda_z;
    let num_zeta: Array1<f64> = 1.0 + &coords.lambda_t;
    let b_sup_theta: Array1<f64> = &profiles.psi_r * &num_theta / &two_pi_g;
    let b_sup_zeta: Array1<f64> = &profiles.psi_r * &num_zeta / &two_pi_g;

    let b_sup_theta_r: Array1<f64> =
        (&profiles.psi_rr * &num_theta + &profiles.psi_r * &profiles.iota_r) / &two_pi_g - &b_sup_theta * &jacobian.g_r / g;
    let b_sup_theta_t: Array1<f64> = -(&profiles.psi_r * &coords.lambda_tz) / &two_pi_g - &b_sup_theta * &jacobian.g_t / g;
    let b_sup_theta_z: Array1<f64> = -(&profiles.psi_r * &coords.lambda_zz) / &two_pi_g - &b_sup_theta * &jacobian.g_z / g;
    let b_sup_zeta_r: Array1<f64> = &profiles.psi_rr * &num_zeta / &two_pi_g - &b_sup_zeta * &jacobian.g_r / g;
    let b_sup_zeta_t: Array1<f64> = &profiles.psi_r * &coords.lambda_tt / &two_pi_g - &b_sup_zeta * &jacobian.g_t / g;
    let b_sup_zeta_z: Array1<f64> = &profiles.psi_r * &coords.lambda_tz / &two_pi_g - &b_sup_zeta * &jacobian.g_z / g;

    let b_vec: Vec3 = basis.e_theta.scale(&b_sup_theta).add(&basis.e_zeta.scale(&b_sup_zeta));
    let b_mag: Array1<f64> = b_vec.norm();

    // componentwise derivatives of the field vector
    let b_vec_r: Vec3 = basis
        .e_theta
        .scale(&b_sup_theta_r)
        .add(&basis.e_theta_r.scale(&b_sup_theta))
        .add(&basis.e_zeta.scale(&b_sup_zeta_r))
        .add(&basis.e_zeta_r.scale(&b_sup_zeta));
    let b_vec_t: Vec3 = basis
        .e_theta
        .scale(&b_sup_theta_t)
        .add(&basis.e_theta_t.scale(&b_sup_theta))
        .add(&basis.e_zeta.scale(&b_sup_zeta_t))
        .add(&basis.e_zeta_t.scale(&b_sup_zeta));
    let b_vec_z: Vec3 = basis
        .e_theta
        .scale(&b_sup_theta_z)
        .add(&basis.e_theta_z.scale(&b_sup_theta))
        .add(&basis.e_zeta.scale(&b_sup_zeta_z))
        .add(&basis.e_zeta_z.scale(&b_sup_zeta));

    return MagneticField {
        b_sub_rho: b_vec.dot(&basis.e_rho),
        b_sub_theta: b_vec.dot(&basis.e_theta),
        b_sub_zeta: b_vec.dot(&basis.e_zeta),
        b_sub_rho_t: b_vec_t.dot(&basis.e_rho) + b_vec.dot(&basis.e_rho_t),
        b_sub_rho_z: b_vec_z.dot(&basis.e_rho) + b_vec.dot(&basis.e_rho_z),
        b_sub_theta_r: b_vec_r.dot(&basis.e_theta) + b_vec.dot(&basis.e_theta_r),
        b_sub_theta_z: b_vec_z.dot(&basis.e_theta) + b_vec.dot(&basis.e_theta_z),
        b_sub_zeta_r: b_vec_r.dot(&basis.e_zeta) + b_vec.dot(&basis.e_zeta_r),
        b_sub_zeta_t: b_vec_t.dot(&basis.e_zeta) + b_vec.dot(&basis.e_zeta_t),
        b_sup_theta,
        b_sup_zeta,
        b_vec,
        b_mag,
    };
}

/// mu0 g J^i = cyclic curl of the covariant field components.
pub fn compute_current_density(field: &MagneticField, jacobian: &JacobianTerms) -> CurrentDensity {
    let mu0_g: Array1<f64> = MU_0 * &jacobian.g;
    return CurrentDensity {
        j_sup_rho: (&field.b_sub_zeta_t - &field.b_sub_theta_z) / &mu0_g,
        j_sup_theta: (&field.b_sub_rho_z - &field.b_sub_zeta_r) / &mu0_g,
        j_sup_zeta: (&field.b_sub_theta_r - &field.b_sub_rho_t) / &mu0_g,
    };
}

#[cfg(test)]
mod tests {
    use super::super::geometry::{compute_covariant_basis, compute_jacobian, compute_toroidal_coords};
    use super::*;
    use crate::basis::SpectralIndexing;
    use crate::equilibrium::{AxisInput, BoundaryInput, EquilibriumState, ProfileInput};
    use crate::grid::{Grid, NodePattern};
    use crate::transform::Transform;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn circular_state(r0: f64, a: f64, iota: f64) -> EquilibriumState {
        let boundary: Vec<BoundaryInput> = vec![
            BoundaryInput { m: 0, n: 0, r: r0, z: 0.0 },
            BoundaryInput { m: 1, n: 0, r: a, z: 0.0 },
            BoundaryInput { m: -1, n: 0, r: 0.0, z: a },
        ];
        let profiles: Vec<ProfileInput> = vec![ProfileInput { l: 0, pressure: 0.0, iota }];
        let axis: Vec<AxisInput> = vec![AxisInput { n: 0, r: r0, z: 0.0 }];
        return EquilibriumState::new(true, 1.0, 1.0, 2, 2, 0, SpectralIndexing::Ansi, profiles, boundary, axis, 1.0, 1.0).unwrap();
    }

    fn field_on_grid(state: &EquilibriumState, grid: &Grid) -> (FluxSurfaceProfiles, MagneticField, JacobianTerms) {
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
        let profiles: FluxSurfaceProfiles = compute_profiles(&ctx).unwrap();
        let coords = compute_toroidal_coords(&ctx).unwrap();
        let covariant = compute_covariant_basis(&coords);
        let jacobian: JacobianTerms = compute_jacobian(&covariant);
        let field: MagneticField = compute_magnetic_field(&profiles, &coords, &covariant, &jacobian);
        return (profiles, field, jacobian);
    }

    #[test]
    fn test_field_of_circular_surfaces_with_quadratic_flux() {
        // psi = Psi rho^2 on concentric circular surfaces of minor radius a
        // gives a uniform toroidal field Psi / (pi a^2)
        let a: f64 = 0.8;
        let state: EquilibriumState = circular_state(3.5, a, 0.7);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let (_, field, _) = field_on_grid(&state, &grid);
        let b_tor_expected: f64 = state.psi / (std::f64::consts::PI * a * a);
        for i in 0..grid.num_nodes {
            assert_abs_diff_eq!(field.b_vec.phi[i].abs(), b_tor_expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_field_is_tangent_to_flux_surfaces() {
        // B has no radial contravariant component by construction, so the
        // covariant radial component must equal B . e_rho exactly
        let state: EquilibriumState = circular_state(4.0, 1.0, 1.3);
        let grid: Grid = Grid::new(5, 0, 1.0, NodePattern::Quad).unwrap();
        let (_, field, jacobian) = field_on_grid(&state, &grid);
        // poloidal flux consistency: B^theta / B^zeta = iota when lambda = 0
        for i in 0..grid.num_nodes {
            assert_abs_diff_eq!(field.b_sup_theta[i] / field.b_sup_zeta[i], 1.3, epsilon = 1e-10);
            assert!(jacobian.g[i].abs() > 0.0);
            assert!(field.b_mag[i].is_finite());
        }
    }

    #[test]
    fn test_covariant_component_derivatives_match_finite_differences() {
        let state: EquilibriumState = circular_state(4.0, 1.0, 0.9);
        let h: f64 = 1e-5;
        let rho: f64 = 0.55;
        let theta: f64 = 0.8;
        let single = |r: f64, t: f64| -> Grid { Grid::from_nodes(Array2::from_shape_vec((1, 3), vec![r, t, 0.0]).unwrap(), 1.0) };

        let (_, field_mid, _) = field_on_grid(&state, &single(rho, theta));

        // radial derivative of B_zeta
        let (_, field_rp, _) = field_on_grid(&state, &single(rho + h, theta));
        let (_, field_rm, _) = field_on_grid(&state, &single(rho - h, theta));
        let fd_zeta_r: f64 = (field_rp.b_sub_zeta[0] - field_rm.b_sub_zeta[0]) / (2.0 * h);
        assert_abs_diff_eq!(field_mid.b_sub_zeta_r[0], fd_zeta_r, epsilon = 1e-6);

        let fd_theta_r: f64 = (field_rp.b_sub_theta[0] - field_rm.b_sub_theta[0]) / (2.0 * h);
        assert_abs_diff_eq!(field_mid.b_sub_theta_r[0], fd_theta_r, epsilon = 1e-6);

        // poloidal derivative of B_rho and B_zeta
        let (_, field_tp, _) = field_on_grid(&state, &single(rho, theta + h));
        let (_, field_tm, _) = field_on_grid(&state, &single(rho, theta - h));
        let fd_rho_t: f64 = (field_tp.b_sub_rho[0] - field_tm.b_sub_rho[0]) / (2.0 * h);
        assert_abs_diff_eq!(field_mid.b_sub_rho_t[0], fd_rho_t, epsilon = 1e-6);
        let fd_zeta_t: f64 = (field_tp.b_sub_zeta[0] - field_tm.b_sub_zeta[0]) / (2.0 * h);
        assert_abs_diff_eq!(field_mid.b_sub_zeta_t[0], fd_zeta_t, epsilon = 1e-6);
    }

    #[test]
    fn test_axisymmetric_current_has_no_toroidal_angle_terms() {
        // with no zeta dependence, B_rho_z and B_theta_z vanish so
        // J^theta reduces to -B_zeta_r / (mu0 g)
        let state: EquilibriumState = circular_state(4.0, 1.0, 0.9);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let (_, field, jacobian) = field_on_grid(&state, &grid);
        let current: CurrentDensity = compute_current_density(&field, &jacobian);
        for i in 0..grid.num_nodes {
            assert_abs_diff_eq!(field.b_sub_rho_z[i], 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(field.b_sub_theta_z[i], 0.0, epsilon = 1e-12);
            let expected: f64 = -field.b_sub_zeta_r[i] / (MU_0 * jacobian.g[i]);
            assert_abs_diff_eq!(current.j_sup_theta[i], expected, epsilon = expected.abs().max(1.0) * 1e-12);
        }
    }
}
