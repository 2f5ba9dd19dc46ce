use crate::basis::SpectralBasis;
use crate::error::{EquilibriumError, Result};
use crate::grid::Grid;
use ndarray::{Array1, Array2};
use ndarray_linalg::SVD;
use rayon::prelude::*;
use std::collections::HashMap;

/// Dense linear operators mapping spectral coefficients to values (and
/// partial derivatives) on a fixed grid. Matrices are built once per
/// (grid, basis, derivative-triple) and cached; the solver then reuses them
/// across thousands of residual evaluations.
pub struct Transform {
    pub basis: SpectralBasis,
    matrices: HashMap<(usize, usize, usize), Array2<f64>>,
    pinv: Option<Array2<f64>>,
    num_nodes: usize,
}

impl Transform {
    /// Precompute every derivative matrix with orders up to `derivs` in each
    /// of (rho, theta, zeta). With `build_pinv` the least-squares fit operator
    /// is also factorised up front.
    pub fn new(grid: &Grid, basis: &SpectralBasis, derivs: usize, build_pinv: bool) -> Result<Transform> {
        let mut triples: Vec<(usize, usize, usize)> = Vec::new();
        for dr in 0..=derivs {
            for dt in 0..=derivs {
                for dz in 0..=derivs {
                    triples.push((dr, dt, dz));
                }
            }
        }

        let built: Vec<((usize, usize, usize), Array2<f64>)> = triples
            .into_par_iter()
            .map(|d: (usize, usize, usize)| {
                let matrix: Array2<f64> = basis.evaluate(&grid.nodes, [d.0, d.1, d.2]);
                return (d, matrix);
            })
            .collect();
        let matrices: HashMap<(usize, usize, usize), Array2<f64>> = built.into_iter().collect();

        let pinv: Option<Array2<f64>> = if build_pinv {
            let a: &Array2<f64> = matrices
                .get(&(0, 0, 0))
                .ok_or_else(|| EquilibriumError::MissingDependency("transform derivative (0,0,0)".to_string()))?;
            Some(pseudo_inverse(a)?)
        } else {
            None
        };

        return Ok(Transform {
            basis: basis.clone(),
            matrices,
            pinv,
            num_nodes: grid.num_nodes,
        });
    }

    pub fn num_nodes(&self) -> usize {
        return self.num_nodes;
    }

    /// Values (or the `[dr, dt, dz]` partial derivative) of the series with
    /// coefficients `c` at every grid node.
    pub fn transform(&self, c: &Array1<f64>, dr: usize, dt: usize, dz: usize) -> Result<Array1<f64>> {
        if c.len() != self.basis.num_modes() {
            return Err(EquilibriumError::InvalidResolution(format!(
                "coefficient vector has {} entries but the basis has {} modes",
                c.len(),
                self.basis.num_modes()
            )));
        }
        let matrix: &Array2<f64> = self
            .matrices
            .get(&(dr, dt, dz))
            .ok_or_else(|| EquilibriumError::MissingDependency(format!("transform derivative ({},{},{})", dr, dt, dz)))?;
        return Ok(matrix.dot(c));
    }

    /// Least-squares fit of nodal values back onto the basis, through the
    /// precomputed pseudoinverse.
    pub fn fit(&self, values: &Array1<f64>) -> Result<Array1<f64>> {
        let pinv: &Array2<f64> = self
            .pinv
            .as_ref()
            .ok_or_else(|| EquilibriumError::MissingDependency("transform fit operator (built with build_pinv = false)".to_string()))?;
        return Ok(pinv.dot(values));
    }
}

/// Moore–Penrose pseudoinverse by SVD, with small singular values cut at
/// `eps * max(m, n) * s_max`.
pub fn pseudo_inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (u_opt, s, vt_opt) = a.svd(true, true).map_err(|e| EquilibriumError::LinAlg(e.to_string()))?;
    let u: Array2<f64> = u_opt.ok_or_else(|| EquilibriumError::LinAlg("SVD did not return U".to_string()))?;
    let vt: Array2<f64> = vt_opt.ok_or_else(|| EquilibriumError::LinAlg("SVD did not return V^T".to_string()))?;

    let (m, n): (usize, usize) = a.dim();
    let rank_max: usize = s.len();
    let cutoff: f64 = f64::EPSILON * m.max(n) as f64 * s.iter().cloned().fold(0.0, f64::max);

    // V * diag(1/s) * U^T, dropping directions below the cutoff
    let mut pinv: Array2<f64> = Array2::zeros((n, m));
    for k in 0..rank_max {
        if s[k] > cutoff {
            let inv_s: f64 = 1.0 / s[k];
            for i in 0..n {
                let v_ik: f64 = vt[[k, i]];
                if v_ik == 0.0 {
                    continue;
                }
                for j in 0..m {
                    pinv[[i, j]] += v_ik * inv_s * u[[j, k]];
                }
            }
        }
    }
    return Ok(pinv);
}

#[test]
fn test_fit_inverts_transform() {
    use crate::basis::{SpectralIndexing, Symmetry};
    use crate::grid::NodePattern;
    use approx::assert_abs_diff_eq;

    // an oversampled grid makes transform() injective so fit() recovers the
    // coefficients exactly
    let basis: SpectralBasis = SpectralBasis::fourier_zernike(4, 4, 1, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    let grid: Grid = Grid::new(8, 3, 1.0, NodePattern::Quad).unwrap();
    let transform: Transform = Transform::new(&grid, &basis, 0, true).unwrap();

    let mut c: Array1<f64> = Array1::zeros(basis.num_modes());
    for j in 0..c.len() {
        c[j] = (0.7 * j as f64 + 0.1).sin();
    }
    let values: Array1<f64> = transform.transform(&c, 0, 0, 0).unwrap();
    let fitted: Array1<f64> = transform.fit(&values).unwrap();
    for j in 0..c.len() {
        assert_abs_diff_eq!(fitted[j], c[j], epsilon = 1e-9);
    }
}

#[test]
fn test_mixed_partial_matches_finite_difference() {
    use crate::basis::{SpectralIndexing, Symmetry};
    use approx::assert_abs_diff_eq;

    // the (1,1,0) matrix agrees with a central rho-difference of the (0,1,0)
    // matrix, confirming mixed partials commute with the radial derivative
    let basis: SpectralBasis = SpectralBasis::fourier_zernike(4, 4, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    let rho: f64 = 0.6;
    let theta: f64 = 1.1;
    let h: f64 = 1e-6;
    let node = |r: f64| -> Array2<f64> { Array2::from_shape_vec((1, 3), vec![r, theta, 0.0]).unwrap() };

    let mixed: Array2<f64> = basis.evaluate(&node(rho), [1, 1, 0]);
    let plus: Array2<f64> = basis.evaluate(&node(rho + h), [0, 1, 0]);
    let minus: Array2<f64> = basis.evaluate(&node(rho - h), [0, 1, 0]);
    for j in 0..basis.num_modes() {
        let fd: f64 = (plus[[0, j]] - minus[[0, j]]) / (2.0 * h);
        assert_abs_diff_eq!(mixed[[0, j]], fd, epsilon = 1e-5);
    }
}

#[test]
fn test_third_order_mixed_partial_matches_finite_difference() {
    use crate::basis::{SpectralIndexing, Symmetry};
    use approx::assert_abs_diff_eq;

    // the (2,1,0) matrix agrees with a central second rho-difference of the
    // (0,1,0) matrix
    let basis: SpectralBasis = SpectralBasis::fourier_zernike(4, 4, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    let rho: f64 = 0.6;
    let theta: f64 = 1.1;
    let h: f64 = 1e-4;
    let node = |r: f64| -> Array2<f64> { Array2::from_shape_vec((1, 3), vec![r, theta, 0.0]).unwrap() };

    let mixed: Array2<f64> = basis.evaluate(&node(rho), [2, 1, 0]);
    let plus: Array2<f64> = basis.evaluate(&node(rho + h), [0, 1, 0]);
    let center: Array2<f64> = basis.evaluate(&node(rho), [0, 1, 0]);
    let minus: Array2<f64> = basis.evaluate(&node(rho - h), [0, 1, 0]);
    for j in 0..basis.num_modes() {
        let fd: f64 = (plus[[0, j]] - 2.0 * center[[0, j]] + minus[[0, j]]) / (h * h);
        assert_abs_diff_eq!(mixed[[0, j]], fd, epsilon = 1e-4);
    }
}

#[test]
fn test_missing_derivative_is_reported() {
    use crate::basis::{SpectralIndexing, Symmetry};
    use crate::grid::NodePattern;

    let basis: SpectralBasis = SpectralBasis::fourier_zernike(2, 2, 0, 1.0, Symmetry::None, SpectralIndexing::Ansi).unwrap();
    let grid: Grid = Grid::new(4, 0, 1.0, NodePattern::Uniform).unwrap();
    let transform: Transform = Transform::new(&grid, &basis, 1, false).unwrap();

    let c: Array1<f64> = Array1::zeros(basis.num_modes());
    assert!(transform.transform(&c, 0, 1, 0).is_ok());
    assert!(matches!(transform.transform(&c, 2, 0, 0), Err(EquilibriumError::MissingDependency(_))));
    assert!(matches!(transform.fit(&c), Err(EquilibriumError::MissingDependency(_))));
}

#[test]
fn test_pseudo_inverse_of_tall_matrix() {
    use approx::assert_abs_diff_eq;

    // pinv(A) * A = I for a full-column-rank tall matrix
    let a: Array2<f64> = Array2::from_shape_vec((4, 2), vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, -1.0]).unwrap();
    let pinv: Array2<f64> = pseudo_inverse(&a).unwrap();
    let identity: Array2<f64> = pinv.dot(&a);
    for i in 0..2 {
        for j in 0..2 {
            let expected: f64 = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(identity[[i, j]], expected, epsilon = 1e-12);
        }
    }
}
