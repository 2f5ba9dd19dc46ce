pub mod fields;
pub mod force;
pub mod geometry;

pub use fields::{CurrentDensity, FluxSurfaceProfiles, MagneticField, compute_current_density, compute_magnetic_field, compute_profiles};
pub use force::{EnergyBudget, ForceBalance, compute_energy, compute_force_balance};
pub use geometry::{
    ContravariantBasis, CovariantBasis, JacobianTerms, ToroidalCoords, compute_contravariant_basis, compute_covariant_basis,
    compute_jacobian, compute_toroidal_coords,
};

use crate::error::Result;
use crate::grid::Grid;
use crate::transform::Transform;
use ndarray::Array1;

/// A vector field sampled at every grid node, in cylindrical components
/// (R-hat, phi-hat, Z-hat). Dot products, cross products and norms taken
/// componentwise in this frame are frame-invariant, so the rotation of the
/// cylindrical frame with zeta never appears explicitly.
#[derive(Debug, Clone)]
pub struct Vec3 {
    pub r: Array1<f64>,
    pub phi: Array1<f64>,
    pub z: Array1<f64>,
}

impl Vec3 {
    pub fn zeros(n: usize) -> Vec3 {
        return Vec3 {
            r: Array1::zeros(n),
            phi: Array1::zeros(n),
            z: Array1::zeros(n),
        };
    }

    pub fn dot(&self, other: &Vec3) -> Array1<f64> {
        return &self.r * &other.r + &self.phi * &other.phi + &self.z * &other.z;
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        return Vec3 {
            r: &self.phi * &other.z - &self.z * &other.phi,
            phi: &self.z * &other.r - &self.r * &other.z,
            z: &self.r * &other.phi - &self.phi * &other.r,
        };
    }

    pub fn scale(&self, factor: &Array1<f64>) -> Vec3 {
        return Vec3 {
            r: &self.r * factor,
            phi: &self.phi * factor,
            z: &self.z * factor,
        };
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        return Vec3 {
            r: &self.r + &other.r,
            phi: &self.phi + &other.phi,
            z: &self.z + &other.z,
        };
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        return Vec3 {
            r: &self.r - &other.r,
            phi: &self.phi - &other.phi,
            z: &self.z - &other.z,
        };
    }

    pub fn norm(&self) -> Array1<f64> {
        return self.dot(self).mapv(f64::sqrt);
    }
}

/// Everything a pipeline evaluation needs: precomputed transforms, the grid,
/// the fixed flux / profile parameters and the coefficient blocks under
/// optimisation.
pub struct ComputeContext<'a> {
    pub r_transform: &'a Transform,
    pub z_transform: &'a Transform,
    pub lambda_transform: &'a Transform,
    pub profile_transform: &'a Transform,
    pub grid: &'a Grid,
    pub psi: f64,
    pub pressure_l: &'a Array1<f64>,
    pub iota_l: &'a Array1<f64>,
    pub r_lmn: &'a Array1<f64>,
    pub z_lmn: &'a Array1<f64>,
    pub lambda_mn: &'a Array1<f64>,
}

/// All intermediate products of one pipeline evaluation.
pub struct PipelineData {
    pub profiles: FluxSurfaceProfiles,
    pub coords: ToroidalCoords,
    pub covariant: CovariantBasis,
    pub jacobian: JacobianTerms,
    pub contravariant: ContravariantBasis,
    pub field: MagneticField,
    pub current: CurrentDensity,
    pub force: ForceBalance,
}

/// Run the physics pipeline in its fixed dependency order:
/// profiles and coordinates, covariant basis, Jacobian, contravariant basis,
/// magnetic field, current density, force balance.
pub fn evaluate_pipeline(ctx: &ComputeContext) -> Result<PipelineData> {
    let profiles: FluxSurfaceProfiles = compute_profiles(ctx)?;
    let coords: ToroidalCoords = compute_toroidal_coords(ctx)?;
    let covariant: CovariantBasis = compute_covariant_basis(&coords);
    let jacobian: JacobianTerms = compute_jacobian(&covariant);
    let contravariant: ContravariantBasis = compute_contravariant_basis(&covariant, &jacobian);
    let field: MagneticField = compute_magnetic_field(&profiles, &coords, &covariant, &jacobian);
    let current: CurrentDensity = compute_current_density(&field, &jacobian);
    let force: ForceBalance = compute_force_balance(&profiles, &jacobian, &contravariant, &field, &current);
    return Ok(PipelineData {
        profiles,
        coords,
        covariant,
        jacobian,
        contravariant,
        field,
        current,
        force,
    });
}

/// Pipeline plus the volume integrals of the energy functional.
pub fn evaluate_energy(ctx: &ComputeContext) -> Result<EnergyBudget> {
    let profiles: FluxSurfaceProfiles = compute_profiles(ctx)?;
    let coords: ToroidalCoords = compute_toroidal_coords(ctx)?;
    let covariant: CovariantBasis = compute_covariant_basis(&coords);
    let jacobian: JacobianTerms = compute_jacobian(&covariant);
    let field: MagneticField = compute_magnetic_field(&profiles, &coords, &covariant, &jacobian);
    return Ok(compute_energy(&profiles, &field, &jacobian, ctx.grid));
}

#[test]
fn test_vec3_cross_is_orthogonal() {
    use approx::assert_abs_diff_eq;

    let a: Vec3 = Vec3 {
        r: Array1::from(vec![1.0, 0.3]),
        phi: Array1::from(vec![-0.5, 2.0]),
        z: Array1::from(vec![2.0, 1.1]),
    };
    let b: Vec3 = Vec3 {
        r: Array1::from(vec![0.7, -1.0]),
        phi: Array1::from(vec![1.5, 0.2]),
        z: Array1::from(vec![-0.3, 0.9]),
    };
    let c: Vec3 = a.cross(&b);
    let a_dot_c: Array1<f64> = a.dot(&c);
    let b_dot_c: Array1<f64> = b.dot(&c);
    for i in 0..2 {
        assert_abs_diff_eq!(a_dot_c[i], 0.0, epsilon = 1e-13);
        assert_abs_diff_eq!(b_dot_c[i], 0.0, epsilon = 1e-13);
    }
}
