use crate::basis::{Mode, SpectralBasis, SpectralIndexing, Symmetry};
use crate::error::{EquilibriumError, Result};
use ndarray::{Array1, Array2, concatenate, Axis, s};

/// One term of the pressure / rotational-transform power series.
#[derive(Debug, Clone, Copy)]
pub struct ProfileInput {
    /// power of rho
    pub l: i32,
    /// pressure coefficient, Pa
    pub pressure: f64,
    /// rotational transform coefficient
    pub iota: f64,
}

/// One double-Fourier coefficient of the fixed last closed flux surface.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryInput {
    pub m: i32,
    pub n: i32,
    /// R coefficient, m
    pub r: f64,
    /// Z coefficient, m
    pub z: f64,
}

/// One toroidal-Fourier coefficient of the magnetic axis guess.
#[derive(Debug, Clone, Copy)]
pub struct AxisInput {
    pub n: i32,
    pub r: f64,
    pub z: f64,
}

/// A flux-surface profile: a radial power series evaluable at arbitrary rho.
#[derive(Debug, Clone)]
pub struct Profile {
    pub basis: SpectralBasis,
    pub params: Array1<f64>,
}

impl Profile {
    pub fn evaluate(&self, rho: &Array1<f64>, dr: usize) -> Array1<f64> {
        let n_nodes: usize = rho.len();
        let mut nodes: Array2<f64> = Array2::zeros((n_nodes, 3));
        nodes.column_mut(0).assign(rho);
        let matrix: Array2<f64> = self.basis.evaluate(&nodes, [dr, 0, 0]);
        return matrix.dot(&self.params);
    }
}

/// The full state of one equilibrium: spectral bases, the optimisable
/// coefficient blocks (R, Z, lambda), the fixed boundary and profile
/// coefficients, and the raw inputs they were derived from (kept so that
/// continuation ratios and resolution changes can re-derive them).
#[derive(Debug, Clone)]
pub struct EquilibriumState {
    pub sym: bool,
    pub nfp: f64,
    /// total toroidal flux through the last closed flux surface, Wb
    pub psi: f64,
    pub l_res: usize,
    pub m_res: usize,
    pub n_res: usize,
    pub indexing: SpectralIndexing,

    pub r_basis: SpectralBasis,
    pub z_basis: SpectralBasis,
    pub lambda_basis: SpectralBasis,
    pub boundary_r_basis: SpectralBasis,
    pub boundary_z_basis: SpectralBasis,
    pub profile_basis: SpectralBasis,

    pub r_lmn: Array1<f64>,
    pub z_lmn: Array1<f64>,
    pub lambda_mn: Array1<f64>,
    pub boundary_r_mn: Array1<f64>,
    pub boundary_z_mn: Array1<f64>,
    pub pressure_l: Array1<f64>,
    pub iota_l: Array1<f64>,

    pub profile_inputs: Vec<ProfileInput>,
    pub boundary_inputs: Vec<BoundaryInput>,
    pub axis_inputs: Vec<AxisInput>,
    /// multiplier on the non-axisymmetric boundary shaping
    pub bdry_ratio: f64,
    /// multiplier on the pressure profile
    pub pres_ratio: f64,
}

impl EquilibriumState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sym: bool,
        nfp: f64,
        psi: f64,
        l_res: usize,
        m_res: usize,
        n_res: usize,
        indexing: SpectralIndexing,
        profile_inputs: Vec<ProfileInput>,
        boundary_inputs: Vec<BoundaryInput>,
        axis_inputs: Vec<AxisInput>,
        bdry_ratio: f64,
        pres_ratio: f64,
    ) -> Result<EquilibriumState> {
        if boundary_inputs.is_empty() {
            return Err(EquilibriumError::InvalidResolution(
                "at least one boundary coefficient is required".to_string(),
            ));
        }

        let (r_sym, z_sym, lambda_sym): (Symmetry, Symmetry, Symmetry) = state_symmetries(sym);
        let r_basis: SpectralBasis = SpectralBasis::fourier_zernike(l_res, m_res, n_res, nfp, r_sym, indexing)?;
        let z_basis: SpectralBasis = SpectralBasis::fourier_zernike(l_res, m_res, n_res, nfp, z_sym, indexing)?;
        let lambda_basis: SpectralBasis = SpectralBasis::double_fourier_series(m_res, n_res, nfp, lambda_sym);
        let boundary_r_basis: SpectralBasis = SpectralBasis::double_fourier_series(m_res, n_res, nfp, r_sym);
        let boundary_z_basis: SpectralBasis = SpectralBasis::double_fourier_series(m_res, n_res, nfp, z_sym);

        let max_profile_degree: usize = profile_inputs.iter().map(|p: &ProfileInput| p.l.max(0) as usize).max().unwrap_or(0);
        let profile_basis: SpectralBasis = SpectralBasis::power_series(l_res.max(max_profile_degree));

        let mut state: EquilibriumState = EquilibriumState {
            sym,
            nfp,
            psi,
            l_res,
            m_res,
            n_res,
            indexing,
            r_basis,
            z_basis,
            lambda_basis,
            boundary_r_basis,
            boundary_z_basis,
            profile_basis,
            r_lmn: Array1::zeros(0),
            z_lmn: Array1::zeros(0),
            lambda_mn: Array1::zeros(0),
            boundary_r_mn: Array1::zeros(0),
            boundary_z_mn: Array1::zeros(0),
            pressure_l: Array1::zeros(0),
            iota_l: Array1::zeros(0),
            profile_inputs,
            boundary_inputs,
            axis_inputs,
            bdry_ratio,
            pres_ratio,
        };
        state.format_profiles();
        state.format_boundary();
        state.initial_guess();
        return Ok(state);
    }

    /// Scatter the raw profile terms onto the power-series basis, applying
    /// the pressure continuation ratio.
    fn format_profiles(&mut self) {
        let mut pressure_l: Array1<f64> = Array1::zeros(self.profile_basis.num_modes());
        let mut iota_l: Array1<f64> = Array1::zeros(self.profile_basis.num_modes());
        for input in self.profile_inputs.iter() {
            if let Some(index) = self.profile_basis.mode_index(Mode { l: input.l, m: 0, n: 0 }) {
                pressure_l[index] = input.pressure * self.pres_ratio;
                iota_l[index] = input.iota;
            }
        }
        self.pressure_l = pressure_l;
        self.iota_l = iota_l;
    }

    /// Scatter the raw boundary terms onto the surface bases, applying the
    /// 3-D shaping continuation ratio to the non-axisymmetric modes.
    fn format_boundary(&mut self) {
        let mut boundary_r_mn: Array1<f64> = Array1::zeros(self.boundary_r_basis.num_modes());
        let mut boundary_z_mn: Array1<f64> = Array1::zeros(self.boundary_z_basis.num_modes());
        for input in self.boundary_inputs.iter() {
            let ratio: f64 = if input.n == 0 { 1.0 } else { self.bdry_ratio };
            let mode: Mode = Mode { l: 0, m: input.m, n: input.n };
            if let Some(index) = self.boundary_r_basis.mode_index(mode) {
                boundary_r_mn[index] = input.r * ratio;
            }
            if let Some(index) = self.boundary_z_basis.mode_index(mode) {
                boundary_z_mn[index] = input.z * ratio;
            }
        }
        self.boundary_r_mn = boundary_r_mn;
        self.boundary_z_mn = boundary_z_mn;
    }

    /// Interior coefficients interpolating between the axis guess at rho = 0
    /// and the boundary at rho = 1: each boundary mode (m, n) maps onto the
    /// lowest Zernike degree |m|; the m = 0 families split between degrees 0
    /// and 2 so both endpoints are matched. Lambda starts at zero.
    fn initial_guess(&mut self) {
        self.r_lmn = guess_block(&self.r_basis, &self.boundary_r_basis, &self.boundary_r_mn, &self.axis_inputs, true);
        self.z_lmn = guess_block(&self.z_basis, &self.boundary_z_basis, &self.boundary_z_mn, &self.axis_inputs, false);
        self.lambda_mn = Array1::zeros(self.lambda_basis.num_modes());
    }

    /// Change spectral resolution in place, carrying over every coefficient
    /// whose (l, m, n) mode exists in both the old and the new basis.
    pub fn change_resolution(&mut self, l_res: usize, m_res: usize, n_res: usize) -> Result<()> {
        let (r_sym, z_sym, lambda_sym): (Symmetry, Symmetry, Symmetry) = state_symmetries(self.sym);
        let r_basis: SpectralBasis = SpectralBasis::fourier_zernike(l_res, m_res, n_res, self.nfp, r_sym, self.indexing)?;
        let z_basis: SpectralBasis = SpectralBasis::fourier_zernike(l_res, m_res, n_res, self.nfp, z_sym, self.indexing)?;
        let lambda_basis: SpectralBasis = SpectralBasis::double_fourier_series(m_res, n_res, self.nfp, lambda_sym);

        self.r_lmn = copy_coeffs(&self.r_lmn, &self.r_basis, &r_basis);
        self.z_lmn = copy_coeffs(&self.z_lmn, &self.z_basis, &z_basis);
        self.lambda_mn = copy_coeffs(&self.lambda_mn, &self.lambda_basis, &lambda_basis);

        self.r_basis = r_basis;
        self.z_basis = z_basis;
        self.lambda_basis = lambda_basis;
        self.boundary_r_basis = SpectralBasis::double_fourier_series(m_res, n_res, self.nfp, r_sym);
        self.boundary_z_basis = SpectralBasis::double_fourier_series(m_res, n_res, self.nfp, z_sym);
        let max_profile_degree: usize = self.profile_inputs.iter().map(|p: &ProfileInput| p.l.max(0) as usize).max().unwrap_or(0);
        self.profile_basis = SpectralBasis::power_series(l_res.max(max_profile_degree));
        self.l_res = l_res;
        self.m_res = m_res;
        self.n_res = n_res;

        self.format_profiles();
        self.format_boundary();
        return Ok(());
    }

    /// Update the continuation multipliers and re-derive the boundary and
    /// profile coefficients (the interior coefficients are left alone; the
    /// perturbation step warm-starts them).
    pub fn set_ratios(&mut self, bdry_ratio: f64, pres_ratio: f64) {
        self.bdry_ratio = bdry_ratio;
        self.pres_ratio = pres_ratio;
        self.format_profiles();
        self.format_boundary();
    }

    pub fn pressure_profile(&self) -> Profile {
        return Profile {
            basis: self.profile_basis.clone(),
            params: self.pressure_l.clone(),
        };
    }

    pub fn iota_profile(&self) -> Profile {
        return Profile {
            basis: self.profile_basis.clone(),
            params: self.iota_l.clone(),
        };
    }

    /// Concatenated optimisable coefficients `[R; Z; lambda]`.
    pub fn pack_state(&self) -> Array1<f64> {
        return concatenate(
            Axis(0),
            &[self.r_lmn.view(), self.z_lmn.view(), self.lambda_mn.view()],
        )
        .unwrap_or_else(|_| Array1::zeros(0));
    }

    /// Split a packed coefficient vector back into its blocks.
    pub fn unpack_state(&self, y: &Array1<f64>) -> Result<(Array1<f64>, Array1<f64>, Array1<f64>)> {
        let nr: usize = self.r_basis.num_modes();
        let nz: usize = self.z_basis.num_modes();
        let nl: usize = self.lambda_basis.num_modes();
        if y.len() != nr + nz + nl {
            return Err(EquilibriumError::InvalidResolution(format!(
                "packed state has {} entries, expected {}",
                y.len(),
                nr + nz + nl
            )));
        }
        let r_lmn: Array1<f64> = y.slice(s![0..nr]).to_owned();
        let z_lmn: Array1<f64> = y.slice(s![nr..nr + nz]).to_owned();
        let lambda_mn: Array1<f64> = y.slice(s![nr + nz..]).to_owned();
        return Ok((r_lmn, z_lmn, lambda_mn));
    }

    /// Store a packed coefficient vector as the current state.
    pub fn assign_state(&mut self, y: &Array1<f64>) -> Result<()> {
        let (r_lmn, z_lmn, lambda_mn) = self.unpack_state(y)?;
        self.r_lmn = r_lmn;
        self.z_lmn = z_lmn;
        self.lambda_mn = lambda_mn;
        return Ok(());
    }

    /// Major radius over minor radius of the rho = 1 surface, from its
    /// inboard / outboard midplane extents at zeta = 0.
    pub fn aspect_ratio(&self) -> f64 {
        let nodes: Array2<f64> = Array2::from_shape_vec((2, 3), vec![1.0, 0.0, 0.0, 1.0, std::f64::consts::PI, 0.0])
            .unwrap_or_else(|_| Array2::zeros((2, 3)));
        let matrix: Array2<f64> = self.r_basis.evaluate(&nodes, [0, 0, 0]);
        let r: Array1<f64> = matrix.dot(&self.r_lmn);
        let r_outboard: f64 = r[0].max(r[1]);
        let r_inboard: f64 = r[0].min(r[1]);
        let r_major: f64 = 0.5 * (r_outboard + r_inboard);
        let r_minor: f64 = 0.5 * (r_outboard - r_inboard);
        return r_major / r_minor;
    }
}

fn state_symmetries(sym: bool) -> (Symmetry, Symmetry, Symmetry) {
    if sym {
        // stellarator symmetry: R even, Z and lambda odd
        return (Symmetry::Cos, Symmetry::Sin, Symmetry::Sin);
    }
    return (Symmetry::None, Symmetry::None, Symmetry::None);
}

/// Initial interior coefficients for one coordinate block.
fn guess_block(
    basis: &SpectralBasis,
    boundary_basis: &SpectralBasis,
    boundary_mn: &Array1<f64>,
    axis_inputs: &[AxisInput],
    is_r: bool,
) -> Array1<f64> {
    let mut coeffs: Array1<f64> = Array1::zeros(basis.num_modes());
    for (k, mode) in boundary_basis.modes.iter().enumerate() {
        let b: f64 = boundary_mn[k];
        if mode.m != 0 {
            if let Some(index) = basis.mode_index(Mode { l: mode.m.abs(), m: mode.m, n: mode.n }) {
                coeffs[index] = b;
            }
            continue;
        }
        // m = 0: blend so rho = 0 hits the axis guess and rho = 1 the boundary
        let axis: f64 = axis_inputs
            .iter()
            .find(|a: &&AxisInput| a.n == mode.n)
            .map(|a: &AxisInput| if is_r { a.r } else { a.z })
            .unwrap_or(b);
        if let Some(index) = basis.mode_index(Mode { l: 0, m: 0, n: mode.n }) {
            coeffs[index] = 0.5 * (b + axis);
        }
        if let Some(index) = basis.mode_index(Mode { l: 2, m: 0, n: mode.n }) {
            coeffs[index] = 0.5 * (b - axis);
        }
    }
    return coeffs;
}

/// Carry coefficients between bases by matching modes; everything else is 0.
pub fn copy_coeffs(old: &Array1<f64>, old_basis: &SpectralBasis, new_basis: &SpectralBasis) -> Array1<f64> {
    let mut out: Array1<f64> = Array1::zeros(new_basis.num_modes());
    for (j, mode) in new_basis.modes.iter().enumerate() {
        if let Some(index) = old_basis.mode_index(*mode) {
            out[j] = old[index];
        }
    }
    return out;
}

#[cfg(test)]
fn solovev_like_state() -> EquilibriumState {
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
fn test_initial_guess_matches_boundary_and_axis() {
    use approx::assert_abs_diff_eq;

    let state: EquilibriumState = solovev_like_state();

    // at rho = 1 the guess reproduces the boundary surface
    let theta_samples: Vec<f64> = vec![0.0, 0.9, 2.2, 4.0, 5.5];
    for &theta in theta_samples.iter() {
        let nodes: Array2<f64> = Array2::from_shape_vec((1, 3), vec![1.0, theta, 0.0]).unwrap();
        let r: f64 = state.r_basis.evaluate(&nodes, [0, 0, 0]).dot(&state.r_lmn)[0];
        let z: f64 = state.z_basis.evaluate(&nodes, [0, 0, 0]).dot(&state.z_lmn)[0];
        let r_expected: f64 = 3.999 + 1.026 * theta.cos() - 0.068 * (2.0 * theta).cos();
        let z_expected: f64 = 1.58 * theta.sin() + 0.01 * (2.0 * theta).sin();
        assert_abs_diff_eq!(r, r_expected, epsilon = 1e-12);
        assert_abs_diff_eq!(z, z_expected, epsilon = 1e-12);
    }

    // at rho = 0 it reproduces the axis guess
    let axis_nodes: Array2<f64> = Array2::from_shape_vec((1, 3), vec![0.0, 0.0, 0.0]).unwrap();
    let r_axis: f64 = state.r_basis.evaluate(&axis_nodes, [0, 0, 0]).dot(&state.r_lmn)[0];
    let z_axis: f64 = state.z_basis.evaluate(&axis_nodes, [0, 0, 0]).dot(&state.z_lmn)[0];
    assert_abs_diff_eq!(r_axis, 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(z_axis, 0.0, epsilon = 1e-12);
}

#[test]
fn test_change_resolution_preserves_shared_modes() {
    use approx::assert_abs_diff_eq;

    let mut state: EquilibriumState = solovev_like_state();
    let r_old: Array1<f64> = state.r_lmn.clone();
    let basis_old: SpectralBasis = state.r_basis.clone();

    state.change_resolution(8, 8, 0).unwrap();
    for (j, mode) in state.r_basis.modes.iter().enumerate() {
        match basis_old.mode_index(*mode) {
            Some(index) => assert_abs_diff_eq!(state.r_lmn[j], r_old[index], epsilon = 1e-15),
            None => assert_abs_diff_eq!(state.r_lmn[j], 0.0, epsilon = 1e-15),
        }
    }

    // shrinking back drops the new modes and keeps the rest
    state.change_resolution(6, 6, 0).unwrap();
    for (j, mode) in state.r_basis.modes.iter().enumerate() {
        let index: usize = basis_old.mode_index(*mode).unwrap();
        assert_abs_diff_eq!(state.r_lmn[j], r_old[index], epsilon = 1e-15);
    }
}

#[test]
fn test_ratios_scale_shaping_and_pressure() {
    use approx::assert_abs_diff_eq;

    let profiles: Vec<ProfileInput> = vec![ProfileInput { l: 0, pressure: 1000.0, iota: 0.8 }];
    let boundary: Vec<BoundaryInput> = vec![
        BoundaryInput { m: 0, n: 0, r: 10.0, z: 0.0 },
        BoundaryInput { m: 1, n: 0, r: 1.0, z: 0.0 },
        BoundaryInput { m: -1, n: 0, r: 0.0, z: 1.0 },
        BoundaryInput { m: 1, n: 1, r: 0.3, z: 0.0 },
    ];
    let mut state: EquilibriumState =
        EquilibriumState::new(true, 5.0, 1.0, 4, 4, 2, SpectralIndexing::Ansi, profiles, boundary, Vec::new(), 0.5, 0.25).unwrap();

    let shaped: usize = state.boundary_r_basis.mode_index(Mode { l: 0, m: 1, n: 1 }).unwrap();
    let round: usize = state.boundary_r_basis.mode_index(Mode { l: 0, m: 1, n: 0 }).unwrap();
    assert_abs_diff_eq!(state.boundary_r_mn[shaped], 0.15, epsilon = 1e-15);
    assert_abs_diff_eq!(state.boundary_r_mn[round], 1.0, epsilon = 1e-15);
    assert_abs_diff_eq!(state.pressure_l[0], 250.0, epsilon = 1e-12);
    // iota is never scaled
    assert_abs_diff_eq!(state.iota_l[0], 0.8, epsilon = 1e-15);

    state.set_ratios(1.0, 1.0);
    assert_abs_diff_eq!(state.boundary_r_mn[shaped], 0.3, epsilon = 1e-15);
    assert_abs_diff_eq!(state.pressure_l[0], 1000.0, epsilon = 1e-12);
}

#[test]
fn test_aspect_ratio_of_circular_boundary() {
    use approx::assert_abs_diff_eq;

    let boundary: Vec<BoundaryInput> = vec![
        BoundaryInput { m: 0, n: 0, r: 10.0, z: 0.0 },
        BoundaryInput { m: 1, n: 0, r: 2.5, z: 0.0 },
        BoundaryInput { m: -1, n: 0, r: 0.0, z: 2.5 },
    ];
    let state: EquilibriumState = EquilibriumState::new(
        true,
        1.0,
        1.0,
        2,
        2,
        0,
        SpectralIndexing::Ansi,
        vec![ProfileInput { l: 0, pressure: 0.0, iota: 1.0 }],
        boundary,
        Vec::new(),
        1.0,
        1.0,
    )
    .unwrap();
    assert_abs_diff_eq!(state.aspect_ratio(), 4.0, epsilon = 1e-12);
}
