use super::{ComputeContext, Vec3};
use crate::error::Result;
use ndarray::Array1;

/// The flux-coordinate mapping (R, Z)(rho, theta, zeta) and the poloidal
/// stream function lambda(theta, zeta), with every partial derivative the
/// downstream stages consume.
pub struct ToroidalCoords {
    pub r: Array1<f64>,
    pub r_r: Array1<f64>,
    pub r_t: Array1<f64>,
    pub r_z: Array1<f64>,
    pub r_rr: Array1<f64>,
    pub r_rt: Array1<f64>,
    pub r_rz: Array1<f64>,
    pub r_tt: Array1<f64>,
    pub r_tz: Array1<f64>,
    pub r_zz: Array1<f64>,
    pub z_r: Array1<f64>,
    pub z_t: Array1<f64>,
    pub z_z: Array1<f64>,
    pub z_rr: Array1<f64>,
    pub z_rt: Array1<f64>,
    pub z_rz: Array1<f64>,
    pub z_tt: Array1<f64>,
    pub z_tz: Array1<f64>,
    pub z_zz: Array1<f64>,
    pub lambda_t: Array1<f64>,
    pub lambda_z: Array1<f64>,
    pub lambda_tt: Array1<f64>,
    pub lambda_tz: Array1<f64>,
    pub lambda_zz: Array1<f64>,
}

/// Tangent vectors of the flux-coordinate mapping and their componentwise
/// partial derivatives (cylindrical components; the phi components carry the
/// frame-rotation terms of the toroidal derivative of the position vector).
pub struct CovariantBasis {
    pub e_rho: Vec3,
    pub e_theta: Vec3,
    pub e_zeta: Vec3,
    pub e_rho_r: Vec3,
    pub e_rho_t: Vec3,
    pub e_rho_z: Vec3,
    pub e_theta_r: Vec3,
    pub e_theta_t: Vec3,
    pub e_theta_z: Vec3,
    pub e_zeta_r: Vec3,
    pub e_zeta_t: Vec3,
    pub e_zeta_z: Vec3,
}

/// Coordinate Jacobian `g = e_rho . (e_theta x e_zeta)` and its first
/// derivatives (Jacobi's formula with componentwise column derivatives).
pub struct JacobianTerms {
    pub g: Array1<f64>,
    pub g_r: Array1<f64>,
    pub g_t: Array1<f64>,
    pub g_z: Array1<f64>,
}

/// Reciprocal basis vectors and the radial metric factor.
pub struct ContravariantBasis {
    pub e_sup_rho: Vec3,
    pub e_sup_theta: Vec3,
    pub e_sup_zeta: Vec3,
    /// |grad rho|
    pub grad_rho_mag: Array1<f64>,
}

pub fn compute_toroidal_coords(ctx: &ComputeContext) -> Result<ToroidalCoords> {
    let r_tf = ctx.r_transform;
    let z_tf = ctx.z_transform;
    let l_tf = ctx.lambda_transform;
    return Ok(ToroidalCoords {
        r: r_tf.transform(ctx.r_lmn, 0, 0, 0)?,
        r_r: r_tf.transform(ctx.r_lmn, 1, 0, 0)?,
        r_t: r_tf.transform(ctx.r_lmn, 0, 1, 0)?,
        r_z: r_tf.transform(ctx.r_lmn, 0, 0, 1)?,
        r_rr: r_tf.transform(ctx.r_lmn, 2, 0, 0)?,
        r_rt: r_tf.transform(ctx.r_lmn, 1, 1, 0)?,
        r_rz: r_tf.transform(ctx.r_lmn, 1, 0, 1)?,
        r_tt: r_tf.transform(ctx.r_lmn, 0, 2, 0)?,
        r_tz: r_tf.transform(ctx.r_lmn, 0, 1, 1)?,
        r_zz: r_tf.transform(ctx.r_lmn, 0, 0, 2)?,
        z_r: z_tf.transform(ctx.z_lmn, 1, 0, 0)?,
        z_t: z_tf.transform(ctx.z_lmn, 0, 1, 0)?,
        z_z: z_tf.transform(ctx.z_lmn, 0, 0, 1)?,
        z_rr: z_tf.transform(ctx.z_lmn, 2, 0, 0)?,
        z_rt: z_tf.transform(ctx.z_lmn, 1, 1, 0)?,
        z_rz: z_tf.transform(ctx.z_lmn, 1, 0, 1)?,
        z_tt: z_tf.transform(ctx.z_lmn, 0, 2, 0)?,
        z_tz: z_tf.transform(ctx.z_lmn, 0, 1, 1)?,
        z_zz: z_tf.transform(ctx.z_lmn, 0, 0, 2)?,
        lambda_t: l_tf.transform(ctx.lambda_mn, 0, 1, 0)?,
        lambda_z: l_tf.transform(ctx.lambda_mn, 0, 0, 1)?,
        lambda_tt: l_tf.transform(ctx.lambda_mn, 0, 2, 0)?,
        lambda_tz: l_tf.transform(ctx.lambda_mn, 0, 1, 1)?,
        lambda_zz: l_tf.transform(ctx.lambda_mn, 0, 0, 2)?,
    });
}

pub fn compute_covariant_basis(coords: &ToroidalCoords) -> CovariantBasis {
    let n: usize = coords.r.len();
    let zero: Array1<f64> = Array1::zeros(n);
    return CovariantBasis {
        e_rho: Vec3 {
            r: coords.r_r.clone(),
            phi: zero.clone(),
            z: coords.z_r.clone(),
        },
        e_theta: Vec3 {
            r: coords.r_t.clone(),
            phi: zero.clone(),
            z: coords.z_t.clone(),
        },
        e_zeta: Vec3 {
            r: coords.r_z.clone(),
            phi: coords.r.clone(),
            z: coords.z_z.clone(),
        },
        e_rho_r: Vec3 {
            r: coords.r_rr.clone(),
            phi: zero.clone(),
            z: coords.z_rr.clone(),
        },
        e_rho_t: Vec3 {
            r: coords.r_rt.clone(),
            phi: zero.clone(),
            z: coords.z_rt.clone(),
        },
        e_rho_z: Vec3 {
            r: coords.r_rz.clone(),
            phi: zero.clone(),
            z: coords.z_rz.clone(),
        },
        e_theta_r: Vec3 {
            r: coords.r_rt.clone(),
            phi: zero.clone(),
            z: coords.z_rt.clone(),
        },
        e_theta_t: Vec3 {
            r: coords.r_tt.clone(),
            phi: zero.clone(),
            z: coords.z_tt.clone(),
        },
        e_theta_z: Vec3 {
            r: coords.r_tz.clone(),
            phi: zero.clone(),
            z: coords.z_tz.clone(),
        },
        e_zeta_r: Vec3 {
            r: coords.r_rz.clone(),
            phi: coords.r_r.clone(),
            z: coords.z_rz.clone(),
        },
        e_zeta_t: Vec3 {
            r: coords.r_tz.clone(),
            phi: coords.r_t.clone(),
            z: coords.z_tz.clone(),
        },
        e_zeta_z: Vec3 {
            r: coords.r_zz.clone(),
            phi: coords.r_z.clone(),
            z: coords.z_zz.clone(),
        },
    };
}

pub fn compute_jacobian(basis: &CovariantBasis) -> JacobianTerms {
    let theta_cross_zeta: Vec3 = basis.e_theta.cross(&basis.e_zeta);
    let g: Array1<f64> = basis.e_rho.dot(&theta_cross_zeta);

    // d/dx det[e_rho, e_theta, e_zeta]: sum over columns, each differentiated
    let triple = |a: &Vec3, b: &Vec3, c: &Vec3| -> Array1<f64> { a.dot(&b.cross(c)) };
    let g_r: Array1<f64> = triple(&basis.e_rho_r, &basis.e_theta, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta_r, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta, &basis.e_zeta_r);
    let g_t: Array1<f64> = triple(&basis.e_rho_t, &basis.e_theta, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta_t, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta, &basis.e_zeta_t);
    let g_z: Array1<f64> = triple(&basis.e_rho_z, &basis.e_theta, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta_z, &basis.e_zeta)
        + triple(&basis.e_rho, &basis.e_theta, &basis.e_zeta_z);

    return JacobianTerms { g, g_r, g_t, g_z };
}

pub fn compute_contravariant_basis(basis: &CovariantBasis, jacobian: &JacobianTerms) -> ContravariantBasis {
    let inv_g: Array1<f64> = jacobian.g.mapv(|x: f64| 1.0 / x);
    let e_sup_rho: Vec3 = basis.e_theta.cross(&basis.e_zeta).scale(&inv_g);
    let e_sup_theta: Vec3 = basis.e_zeta.cross(&basis.e_rho).scale(&inv_g);
    let e_sup_zeta: Vec3 = basis.e_rho.cross(&basis.e_theta).scale(&inv_g);
    let grad_rho_mag: Array1<f64> = e_sup_rho.norm();
    return ContravariantBasis {
        e_sup_rho,
        e_sup_theta,
        e_sup_zeta,
        grad_rho_mag,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::SpectralIndexing;
    use crate::equilibrium::{AxisInput, BoundaryInput, EquilibriumState, ProfileInput};
    use crate::grid::{Grid, NodePattern};
    use crate::transform::Transform;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    /// Circular concentric tokamak R = R0 + a rho cos(theta),
    /// Z = a rho sin(theta): every geometric quantity is analytic.
    fn circular_state(r0: f64, a: f64) -> EquilibriumState {
        let boundary: Vec<BoundaryInput> = vec![
            BoundaryInput { m: 0, n: 0, r: r0, z: 0.0 },
            BoundaryInput { m: 1, n: 0, r: a, z: 0.0 },
            BoundaryInput { m: -1, n: 0, r: 0.0, z: a },
        ];
        let profiles: Vec<ProfileInput> = vec![ProfileInput { l: 0, pressure: 0.0, iota: 1.0 }];
        let axis: Vec<AxisInput> = vec![AxisInput { n: 0, r: r0, z: 0.0 }];
        return EquilibriumState::new(true, 1.0, 1.0, 2, 2, 0, SpectralIndexing::Ansi, profiles, boundary, axis, 1.0, 1.0).unwrap();
    }

    fn pipeline_parts(state: &EquilibriumState, grid: &Grid) -> (ToroidalCoords, CovariantBasis, JacobianTerms, ContravariantBasis) {
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
        let coords: ToroidalCoords = compute_toroidal_coords(&ctx).unwrap();
        let covariant: CovariantBasis = compute_covariant_basis(&coords);
        let jacobian: JacobianTerms = compute_jacobian(&covariant);
        let contravariant: ContravariantBasis = compute_contravariant_basis(&covariant, &jacobian);
        return (coords, covariant, jacobian, contravariant);
    }

    #[test]
    fn test_jacobian_of_circular_tokamak() {
        // |g| = a^2 rho R for circular concentric surfaces
        let r0: f64 = 4.0;
        let a: f64 = 1.0;
        let state: EquilibriumState = circular_state(r0, a);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let (coords, _, jacobian, _) = pipeline_parts(&state, &grid);
        for i in 0..grid.num_nodes {
            let rho: f64 = grid.nodes[[i, 0]];
            assert_abs_diff_eq!(jacobian.g[i].abs(), a * a * rho * coords.r[i], epsilon = 1e-10);
            // d|g|/dtheta tracks the R variation only
            let theta: f64 = grid.nodes[[i, 1]];
            let g_t_expected: f64 = a * a * rho * (-a * rho * theta.sin());
            assert_abs_diff_eq!(jacobian.g_t[i].abs(), g_t_expected.abs(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_reciprocal_basis_duality() {
        // e^i . e_j = delta_ij at every node
        let state: EquilibriumState = circular_state(3.2, 0.8);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Quad).unwrap();
        let (_, covariant, _, contravariant) = pipeline_parts(&state, &grid);
        let pairs: Vec<(&Vec3, &Vec3, f64)> = vec![
            (&contravariant.e_sup_rho, &covariant.e_rho, 1.0),
            (&contravariant.e_sup_rho, &covariant.e_theta, 0.0),
            (&contravariant.e_sup_rho, &covariant.e_zeta, 0.0),
            (&contravariant.e_sup_theta, &covariant.e_theta, 1.0),
            (&contravariant.e_sup_theta, &covariant.e_zeta, 0.0),
            (&contravariant.e_sup_zeta, &covariant.e_zeta, 1.0),
            (&contravariant.e_sup_zeta, &covariant.e_rho, 0.0),
        ];
        for (sup, sub, expected) in pairs {
            let product: Array1<f64> = sup.dot(sub);
            for i in 0..grid.num_nodes {
                assert_abs_diff_eq!(product[i], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_grad_rho_of_circular_tokamak_is_unit() {
        // concentric circular surfaces: |grad rho| = 1 / a
        let a: f64 = 0.8;
        let state: EquilibriumState = circular_state(3.2, a);
        let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
        let (_, _, _, contravariant) = pipeline_parts(&state, &grid);
        for i in 0..grid.num_nodes {
            assert_abs_diff_eq!(contravariant.grad_rho_mag[i], 1.0 / a, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_jacobian_derivative_against_finite_difference() {
        // g_r from the product rule agrees with a central difference in rho
        let state: EquilibriumState = circular_state(4.0, 1.0);
        let h: f64 = 1e-5;
        let theta: f64 = 1.234;
        let rho: f64 = 0.6;
        let make_grid = |r: f64| -> Grid {
            Grid::from_nodes(ndarray::Array2::from_shape_vec((1, 3), vec![r, theta, 0.0]).unwrap(), 1.0)
        };
        let (_, _, jac_mid, _) = pipeline_parts(&state, &make_grid(rho));
        let (_, _, jac_plus, _) = pipeline_parts(&state, &make_grid(rho + h));
        let (_, _, jac_minus, _) = pipeline_parts(&state, &make_grid(rho - h));
        let fd: f64 = (jac_plus.g[0] - jac_minus.g[0]) / (2.0 * h);
        assert_abs_diff_eq!(jac_mid.g_r[0], fd, epsilon = 1e-7);
    }
}
