use crate::error::{EquilibriumError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use num::integer::binomial;

/// A single spectral mode; `l` is the radial (Zernike or power) degree,
/// `m` the poloidal and `n` the toroidal Fourier wavenumber. Negative `m`
/// or `n` selects the sine harmonic, non-negative the cosine harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    pub l: i32,
    pub m: i32,
    pub n: i32,
}

/// Zernike pyramid truncation rule relating the radial degree `l` to the
/// poloidal wavenumber `m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralIndexing {
    /// `|m| <= l <= L`, densest pyramid; requires `L >= M`
    Ansi,
    /// `|m| <= l` with `l + |m| <= 2 * M` style diagonal cut
    Fringe,
    /// every poloidal family carries the same number of radial degrees
    Chevron,
}

/// Stellarator-symmetry parity filter on the double-Fourier angular factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    /// keep modes whose angular dependence is even under (theta, zeta) -> (-theta, -zeta)
    Cos,
    /// keep the odd modes
    Sin,
    /// keep everything
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BasisKind {
    PowerSeries,
    FourierSeries,
    DoubleFourier,
    FourierZernike,
}

/// A finite spectral series: an ordered list of modes plus the rules to
/// evaluate each mode (and its partial derivatives) at collocation nodes.
#[derive(Debug, Clone)]
pub struct SpectralBasis {
    kind: BasisKind,
    pub modes: Vec<Mode>,
    pub sym: Symmetry,
    /// number of (toroidal) field periods; the toroidal wavenumber is scaled by this
    pub nfp: f64,
}

// sign convention used by the parity filter: sign(0) = +1
fn sign(x: i32) -> i32 {
    if x < 0 {
        return -1;
    }
    return 1;
}

fn keep_mode(sym: Symmetry, m: i32, n: i32) -> bool {
    match sym {
        Symmetry::Cos => return sign(m) == sign(n),
        Symmetry::Sin => return sign(m) != sign(n),
        Symmetry::None => return true,
    }
}

impl SpectralBasis {
    /// Pure radial power series `rho^l` for `l = 0..=l_res`; used for the
    /// pressure and rotational-transform profiles.
    pub fn power_series(l_res: usize) -> SpectralBasis {
        let modes: Vec<Mode> = (0..=l_res as i32).map(|l: i32| Mode { l, m: 0, n: 0 }).collect();
        return SpectralBasis {
            kind: BasisKind::PowerSeries,
            modes,
            sym: Symmetry::None,
            nfp: 1.0,
        };
    }

    /// Toroidal Fourier series `F_n(nfp * zeta)` for `n = -n_res..=n_res`;
    /// used for the magnetic axis initial guess.
    pub fn fourier_series(n_res: usize, nfp: f64, sym: Symmetry) -> SpectralBasis {
        let mut modes: Vec<Mode> = Vec::new();
        for n in -(n_res as i32)..=(n_res as i32) {
            if keep_mode(sym, 0, n) {
                modes.push(Mode { l: 0, m: 0, n });
            }
        }
        sort_modes(&mut modes);
        return SpectralBasis {
            kind: BasisKind::FourierSeries,
            modes,
            sym,
            nfp,
        };
    }

    /// Double Fourier series on the (theta, zeta) surface; used for the
    /// boundary coefficients and for the poloidal stream function lambda.
    pub fn double_fourier_series(m_res: usize, n_res: usize, nfp: f64, sym: Symmetry) -> SpectralBasis {
        let mut modes: Vec<Mode> = Vec::new();
        for m in -(m_res as i32)..=(m_res as i32) {
            for n in -(n_res as i32)..=(n_res as i32) {
                if keep_mode(sym, m, n) {
                    modes.push(Mode { l: 0, m, n });
                }
            }
        }
        sort_modes(&mut modes);
        return SpectralBasis {
            kind: BasisKind::DoubleFourier,
            modes,
            sym,
            nfp,
        };
    }

    /// Full Fourier–Zernike volume basis: Zernike polynomial in (rho, theta)
    /// crossed with a toroidal Fourier factor.
    pub fn fourier_zernike(
        l_res: usize,
        m_res: usize,
        n_res: usize,
        nfp: f64,
        sym: Symmetry,
        indexing: SpectralIndexing,
    ) -> Result<SpectralBasis> {
        if indexing == SpectralIndexing::Ansi && l_res < m_res {
            return Err(EquilibriumError::InvalidResolution(format!(
                "ANSI indexing requires radial resolution >= poloidal resolution, got L={} < M={}",
                l_res, m_res
            )));
        }

        let l_max: i32 = l_res as i32;
        let m_max: i32 = m_res as i32;

        // (l, m >= 0) pairs of the Zernike pyramid
        let mut pol_posm: Vec<(i32, i32)> = Vec::new();
        match indexing {
            SpectralIndexing::Ansi => {
                for d in (0..=l_max).step_by(2) {
                    for m in 0..=m_max {
                        if m + d <= m_max {
                            pol_posm.push((m + d, m));
                        }
                    }
                }
            }
            SpectralIndexing::Fringe => {
                for d in (0..=l_max).step_by(2) {
                    for m in 0..=m_max {
                        if m - d / 2 >= 0 {
                            pol_posm.push((m + d / 2, m - d / 2));
                        }
                    }
                }
            }
            SpectralIndexing::Chevron => {
                for m in 0..=m_max {
                    for d in (0..=l_max).step_by(2) {
                        pol_posm.push((m + d, m));
                    }
                }
            }
        }

        // expand to negative poloidal wavenumbers and cross with toroidal ones
        let mut modes: Vec<Mode> = Vec::new();
        for n in -(n_res as i32)..=(n_res as i32) {
            for &(l, m) in pol_posm.iter() {
                if keep_mode(sym, m, n) {
                    modes.push(Mode { l, m, n });
                }
                if m != 0 && keep_mode(sym, -m, n) {
                    modes.push(Mode { l, m: -m, n });
                }
            }
        }
        sort_modes(&mut modes);
        return Ok(SpectralBasis {
            kind: BasisKind::FourierZernike,
            modes,
            sym,
            nfp,
        });
    }

    pub fn num_modes(&self) -> usize {
        return self.modes.len();
    }

    /// Position of `mode` in the canonical ordering, if present.
    pub fn mode_index(&self, mode: Mode) -> Option<usize> {
        return self.modes.iter().position(|&x: &Mode| x == mode);
    }

    /// Evaluate every mode (or its partial derivative of orders
    /// `[d_rho, d_theta, d_zeta]`) at the given `(rho, theta, zeta)` nodes.
    /// Returns an `(n_nodes, n_modes)` matrix.
    pub fn evaluate(&self, nodes: &Array2<f64>, derivs: [usize; 3]) -> Array2<f64> {
        let n_nodes: usize = nodes.nrows();
        let n_modes: usize = self.modes.len();
        let rho: ArrayView1<f64> = nodes.column(0);
        let theta: ArrayView1<f64> = nodes.column(1);
        let zeta: ArrayView1<f64> = nodes.column(2);
        let [dr, dt, dz] = derivs;

        match self.kind {
            BasisKind::PowerSeries => {
                // no angular dependence
                if dt > 0 || dz > 0 {
                    return Array2::zeros((n_nodes, n_modes));
                }
                let ls: Vec<(i32, i32)> = self.modes.iter().map(|mode: &Mode| (mode.l, 0)).collect();
                return powers(&rho, &ls, dr);
            }
            BasisKind::FourierSeries => {
                if dr > 0 || dt > 0 {
                    return Array2::zeros((n_nodes, n_modes));
                }
                let mut out: Array2<f64> = Array2::zeros((n_nodes, n_modes));
                for (j, mode) in self.modes.iter().enumerate() {
                    let tor: Array1<f64> = fourier(&zeta, mode.n, self.nfp, dz);
                    out.column_mut(j).assign(&tor);
                }
                return out;
            }
            BasisKind::DoubleFourier => {
                // no radial dependence
                if dr > 0 {
                    return Array2::zeros((n_nodes, n_modes));
                }
                let mut out: Array2<f64> = Array2::zeros((n_nodes, n_modes));
                for (j, mode) in self.modes.iter().enumerate() {
                    let pol: Array1<f64> = fourier(&theta, mode.m, 1.0, dt);
                    let tor: Array1<f64> = fourier(&zeta, mode.n, self.nfp, dz);
                    out.column_mut(j).assign(&(pol * tor));
                }
                return out;
            }
            BasisKind::FourierZernike => {
                let lm: Vec<(i32, i32)> = self.modes.iter().map(|mode: &Mode| (mode.l, mode.m)).collect();
                let radial: Array2<f64> = zernike_radial(&rho, &lm, dr);
                let mut out: Array2<f64> = Array2::zeros((n_nodes, n_modes));
                for (j, mode) in self.modes.iter().enumerate() {
                    let pol: Array1<f64> = fourier(&theta, mode.m, 1.0, dt);
                    let tor: Array1<f64> = fourier(&zeta, mode.n, self.nfp, dz);
                    let rad: Array1<f64> = radial.column(j).to_owned();
                    out.column_mut(j).assign(&(rad * pol * tor));
                }
                return out;
            }
        }
    }

    /// Radial factor of each mode at a single `rho`, with the angular factors
    /// stripped; this is what couples coefficients of the same `(m, n)` family
    /// in the boundary and axis constraints.
    pub fn radial_values(&self, rho: f64, dr: usize) -> Array1<f64> {
        let rho_arr: Array1<f64> = Array1::from(vec![rho]);
        match self.kind {
            BasisKind::PowerSeries => {
                let ls: Vec<(i32, i32)> = self.modes.iter().map(|mode: &Mode| (mode.l, 0)).collect();
                return powers(&rho_arr.view(), &ls, dr).row(0).to_owned();
            }
            BasisKind::FourierZernike => {
                let lm: Vec<(i32, i32)> = self.modes.iter().map(|mode: &Mode| (mode.l, mode.m)).collect();
                return zernike_radial(&rho_arr.view(), &lm, dr).row(0).to_owned();
            }
            _ => {
                if dr > 0 {
                    return Array1::zeros(self.modes.len());
                }
                return Array1::ones(self.modes.len());
            }
        }
    }
}

/// Canonical mode ordering: toroidal wavenumber slowest, then radial degree,
/// then poloidal wavenumber. Deterministic for a given resolution.
fn sort_modes(modes: &mut [Mode]) {
    modes.sort_by_key(|mode: &Mode| (mode.n, mode.l, mode.m));
}

/// Fourier factor `cos(k x)` for `m >= 0`, `sin(k x)` for `m < 0`, with
/// `k = |m| * scale`, differentiated `deriv` times. Each derivative scales by
/// `k` and advances the phase by a quarter period.
fn fourier(x: &ArrayView1<f64>, m: i32, scale: f64, deriv: usize) -> Array1<f64> {
    let k: f64 = f64::from(m.unsigned_abs()) * scale;
    let shift: f64 = deriv as f64 * std::f64::consts::FRAC_PI_2;
    let amplitude: f64 = k.powi(deriv as i32);
    if m >= 0 {
        return x.mapv(|t: f64| amplitude * (k * t + shift).cos());
    }
    return x.mapv(|t: f64| amplitude * (k * t + shift).sin());
}

/// Coefficients (descending powers, length `l + 1`) of the Zernike radial
/// polynomial `R_l^{|m|}(rho)`, from the closed-form factorial-ratio formula
/// written as a product of binomials so the integer arithmetic stays exact.
fn zernike_coeffs(l: i32, m_abs: i32) -> Vec<f64> {
    let mut coeffs: Vec<f64> = vec![0.0; (l + 1) as usize];
    let mut s: i32 = m_abs;
    while s <= l {
        let b: i32 = (l - s) / 2;
        let magnitude: u64 = binomial(((l + s) / 2) as u64, b as u64) * binomial(s as u64, ((s + m_abs) / 2) as u64);
        let sign: f64 = if b % 2 == 0 { 1.0 } else { -1.0 };
        coeffs[(l - s) as usize] = sign * magnitude as f64;
        s += 2;
    }
    return coeffs;
}

/// Differentiate a polynomial in descending-power form once.
fn polyder(coeffs: &[f64]) -> Vec<f64> {
    let degree: usize = coeffs.len().saturating_sub(1);
    if degree == 0 {
        return vec![0.0];
    }
    let mut out: Vec<f64> = vec![0.0; degree];
    for j in 0..degree {
        out[j] = coeffs[j] * (degree - j) as f64;
    }
    return out;
}

/// Horner evaluation of a descending-power polynomial.
fn polyval(coeffs: &[f64], x: f64) -> f64 {
    let mut value: f64 = 0.0;
    for &c in coeffs.iter() {
        value = value * x + c;
    }
    return value;
}

/// Zernike radial polynomials `R_l^{|m|}` (columns) at the given radii (rows),
/// differentiated `dr` times.
fn zernike_radial(rho: &ArrayView1<f64>, lm: &[(i32, i32)], dr: usize) -> Array2<f64> {
    let mut out: Array2<f64> = Array2::zeros((rho.len(), lm.len()));
    for (j, &(l, m)) in lm.iter().enumerate() {
        let mut coeffs: Vec<f64> = zernike_coeffs(l, m.abs());
        for _ in 0..dr {
            coeffs = polyder(&coeffs);
        }
        for (i, &r) in rho.iter().enumerate() {
            out[[i, j]] = polyval(&coeffs, r);
        }
    }
    return out;
}

/// Plain powers `rho^l` (columns) at the given radii (rows), differentiated
/// `dr` times.
fn powers(rho: &ArrayView1<f64>, ls: &[(i32, i32)], dr: usize) -> Array2<f64> {
    let mut out: Array2<f64> = Array2::zeros((rho.len(), ls.len()));
    for (j, &(l, _)) in ls.iter().enumerate() {
        let mut coeffs: Vec<f64> = vec![0.0; (l + 1) as usize];
        coeffs[0] = 1.0;
        for _ in 0..dr {
            coeffs = polyder(&coeffs);
        }
        for (i, &r) in rho.iter().enumerate() {
            out[[i, j]] = polyval(&coeffs, r);
        }
    }
    return out;
}

#[test]
fn test_zernike_radial_known_polynomials() {
    use approx::assert_abs_diff_eq;

    // R_4^0 = 6 rho^4 - 6 rho^2 + 1 and R_3^1 = 3 rho^3 - 2 rho
    let rho: Array1<f64> = Array1::from(vec![0.0, 0.37, 0.5, 0.82, 1.0]);
    let values: Array2<f64> = zernike_radial(&rho.view(), &[(4, 0), (3, 1)], 0);
    for (i, &r) in rho.iter().enumerate() {
        assert_abs_diff_eq!(values[[i, 0]], 6.0 * r.powi(4) - 6.0 * r.powi(2) + 1.0, epsilon = 1e-13);
        assert_abs_diff_eq!(values[[i, 1]], 3.0 * r.powi(3) - 2.0 * r, epsilon = 1e-13);
    }

    // first radial derivatives
    let derivs: Array2<f64> = zernike_radial(&rho.view(), &[(4, 0), (3, 1)], 1);
    for (i, &r) in rho.iter().enumerate() {
        assert_abs_diff_eq!(derivs[[i, 0]], 24.0 * r.powi(3) - 12.0 * r, epsilon = 1e-13);
        assert_abs_diff_eq!(derivs[[i, 1]], 9.0 * r.powi(2) - 2.0, epsilon = 1e-13);
    }
}

#[test]
fn test_zernike_radial_endpoint_values() {
    use approx::assert_abs_diff_eq;

    // every radial polynomial is 1 at rho = 1; for m = 0 it is (-1)^(l/2) at rho = 0
    let rho: Array1<f64> = Array1::from(vec![0.0, 1.0]);
    let lm: Vec<(i32, i32)> = vec![(0, 0), (2, 0), (4, 0), (6, 0), (3, 1), (5, 3), (6, 6)];
    let values: Array2<f64> = zernike_radial(&rho.view(), &lm, 0);
    for (j, &(l, m)) in lm.iter().enumerate() {
        assert_abs_diff_eq!(values[[1, j]], 1.0, epsilon = 1e-13);
        if m == 0 {
            let expected: f64 = if (l / 2) % 2 == 0 { 1.0 } else { -1.0 };
            assert_abs_diff_eq!(values[[0, j]], expected, epsilon = 1e-13);
        } else {
            assert_abs_diff_eq!(values[[0, j]], 0.0, epsilon = 1e-13);
        }
    }
}

#[test]
fn test_fourier_derivative_phase_rule() {
    use approx::assert_abs_diff_eq;

    let x: Array1<f64> = Array1::from(vec![0.0, 0.3, 1.1, 2.9]);
    // d/dx cos(2x) = -2 sin(2x); d/dx sin(3x) = 3 cos(3x)
    let d_cos: Array1<f64> = fourier(&x.view(), 2, 1.0, 1);
    let d_sin: Array1<f64> = fourier(&x.view(), -3, 1.0, 1);
    for (i, &t) in x.iter().enumerate() {
        assert_abs_diff_eq!(d_cos[i], -2.0 * (2.0 * t).sin(), epsilon = 1e-13);
        assert_abs_diff_eq!(d_sin[i], 3.0 * (3.0 * t).cos(), epsilon = 1e-13);
    }

    // constant mode: derivative vanishes identically
    let d_const: Array1<f64> = fourier(&x.view(), 0, 1.0, 1);
    for i in 0..x.len() {
        assert_abs_diff_eq!(d_const[i], 0.0, epsilon = 1e-15);
    }
}

#[test]
fn test_ansi_mode_count_and_determinism() {
    let basis_a: SpectralBasis = SpectralBasis::fourier_zernike(6, 6, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    let basis_b: SpectralBasis = SpectralBasis::fourier_zernike(6, 6, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    assert_eq!(basis_a.modes, basis_b.modes);

    // ANSI pyramid, L = M = 6: 16 (l, m>=0) pairs of which 4 have m = 0,
    // so 28 modes after expanding to negative m
    assert_eq!(basis_a.num_modes(), 28);

    // l - |m| is even and non-negative throughout
    for mode in basis_a.modes.iter() {
        assert!(mode.l - mode.m.abs() >= 0);
        assert_eq!((mode.l - mode.m.abs()) % 2, 0);
    }

    // canonical ordering is lexicographic in (n, l, m)
    for pair in basis_a.modes.windows(2) {
        let key0: (i32, i32, i32) = (pair[0].n, pair[0].l, pair[0].m);
        let key1: (i32, i32, i32) = (pair[1].n, pair[1].l, pair[1].m);
        assert!(key0 < key1);
    }
}

#[test]
fn test_ansi_requires_l_at_least_m() {
    let result: Result<SpectralBasis> = SpectralBasis::fourier_zernike(2, 4, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi);
    assert!(matches!(result, Err(EquilibriumError::InvalidResolution(_))));
}

#[test]
fn test_symmetry_partitions_modes() {
    // Cos and Sin bases partition the unrestricted basis
    let full: SpectralBasis = SpectralBasis::double_fourier_series(4, 3, 1.0, Symmetry::None);
    let cos: SpectralBasis = SpectralBasis::double_fourier_series(4, 3, 1.0, Symmetry::Cos);
    let sin: SpectralBasis = SpectralBasis::double_fourier_series(4, 3, 1.0, Symmetry::Sin);
    assert_eq!(cos.num_modes() + sin.num_modes(), full.num_modes());
    for mode in cos.modes.iter() {
        assert_eq!(sign(mode.m), sign(mode.n));
        assert!(sin.mode_index(*mode).is_none());
    }
    for mode in sin.modes.iter() {
        assert_ne!(sign(mode.m), sign(mode.n));
    }
}

#[test]
fn test_fringe_reaches_twice_the_poloidal_resolution() {
    let basis: SpectralBasis = SpectralBasis::fourier_zernike(8, 4, 0, 1.0, Symmetry::None, SpectralIndexing::Fringe).unwrap();
    let l_max: i32 = basis.modes.iter().map(|mode: &Mode| mode.l).max().unwrap();
    assert_eq!(l_max, 8);
    // the fringe pyramid at L = 2M has (M+1)^2 modes
    assert_eq!(basis.num_modes(), 25);
}

#[test]
fn test_evaluate_nfp_scales_toroidal_wavenumber() {
    use approx::assert_abs_diff_eq;

    let nfp: f64 = 3.0;
    let basis: SpectralBasis = SpectralBasis::fourier_series(2, nfp, Symmetry::None);
    let zeta: f64 = 0.4321;
    let nodes: Array2<f64> = Array2::from_shape_vec((1, 3), vec![0.5, 0.0, zeta]).unwrap();
    let values: Array2<f64> = basis.evaluate(&nodes, [0, 0, 0]);
    for (j, mode) in basis.modes.iter().enumerate() {
        let k: f64 = f64::from(mode.n.unsigned_abs()) * nfp;
        let expected: f64 = if mode.n >= 0 { (k * zeta).cos() } else { (k * zeta).sin() };
        assert_abs_diff_eq!(values[[0, j]], expected, epsilon = 1e-13);
    }
}
