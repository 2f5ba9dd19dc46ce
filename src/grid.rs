use crate::error::{EquilibriumError, Result};
use ndarray::{Array1, Array2};

const PI: f64 = std::f64::consts::PI;

/// Radial node placement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePattern {
    /// midpoints of equal-width cells in rho
    Uniform,
    /// Gauss–Legendre abscissae on [0, 1]; exact for the radial quadratures
    /// the energy functional needs
    Quad,
    /// equispaced in rho^2, the natural measure of the Zernike basis
    Jacobi,
}

/// Tensor-product collocation grid over one field period, with quadrature
/// weights summing to (2 pi)^2. No node sits on the coordinate singularity
/// at rho = 0.
#[derive(Debug, Clone)]
pub struct Grid {
    /// `(num_nodes, 3)` matrix of (rho, theta, zeta) triples
    pub nodes: Array2<f64>,
    /// quadrature weight per node
    pub weights: Array1<f64>,
    pub nfp: f64,
    pub num_nodes: usize,
}

impl Grid {
    /// Build a grid resolving poloidal wavenumbers up to `m_grid` and toroidal
    /// wavenumbers up to `n_grid`: `m_grid + 1` radial nodes, `2 m_grid + 1`
    /// poloidal angles and `2 n_grid + 1` toroidal angles per field period.
    pub fn new(m_grid: usize, n_grid: usize, nfp: f64, pattern: NodePattern) -> Result<Grid> {
        if m_grid < 1 {
            return Err(EquilibriumError::InvalidResolution(
                "grid poloidal resolution must be at least 1".to_string(),
            ));
        }
        if !(nfp > 0.0) {
            return Err(EquilibriumError::InvalidResolution(format!(
                "number of field periods must be positive, got {}",
                nfp
            )));
        }

        let n_rho: usize = m_grid + 1;
        let n_theta: usize = 2 * m_grid + 1;
        let n_zeta: usize = 2 * n_grid + 1;

        let (rho, w_rho): (Vec<f64>, Vec<f64>) = radial_nodes(n_rho, pattern);

        let theta: Vec<f64> = (0..n_theta).map(|j: usize| 2.0 * PI * j as f64 / n_theta as f64).collect();
        let w_theta: f64 = 2.0 * PI / n_theta as f64;

        let zeta: Vec<f64> = (0..n_zeta).map(|i: usize| 2.0 * PI * i as f64 / (n_zeta as f64 * nfp)).collect();
        let w_zeta: f64 = 2.0 * PI / n_zeta as f64;

        let num_nodes: usize = n_rho * n_theta * n_zeta;
        let mut nodes: Array2<f64> = Array2::zeros((num_nodes, 3));
        let mut weights: Array1<f64> = Array1::zeros(num_nodes);
        let mut index: usize = 0;
        for i_zeta in 0..n_zeta {
            for i_rho in 0..n_rho {
                for i_theta in 0..n_theta {
                    nodes[[index, 0]] = rho[i_rho];
                    nodes[[index, 1]] = theta[i_theta];
                    nodes[[index, 2]] = zeta[i_zeta];
                    weights[index] = w_rho[i_rho] * w_theta * w_zeta;
                    index += 1;
                }
            }
        }

        return Ok(Grid {
            nodes,
            weights,
            nfp,
            num_nodes,
        });
    }

    /// Wrap explicit nodes (zero quadrature weights); for point-wise
    /// evaluation rather than integration.
    pub fn from_nodes(nodes: Array2<f64>, nfp: f64) -> Grid {
        let num_nodes: usize = nodes.nrows();
        return Grid {
            nodes,
            weights: Array1::zeros(num_nodes),
            nfp,
            num_nodes,
        };
    }
}

/// Radial abscissae and weights on (0, 1], normalised so the weights sum to 1.
fn radial_nodes(n_rho: usize, pattern: NodePattern) -> (Vec<f64>, Vec<f64>) {
    match pattern {
        NodePattern::Uniform => {
            let rho: Vec<f64> = (0..n_rho).map(|k: usize| (2.0 * k as f64 + 1.0) / (2.0 * n_rho as f64)).collect();
            let w: Vec<f64> = vec![1.0 / n_rho as f64; n_rho];
            return (rho, w);
        }
        NodePattern::Quad => {
            let (x, w): (Vec<f64>, Vec<f64>) = gauss_legendre(n_rho);
            // map [-1, 1] onto [0, 1]
            let rho: Vec<f64> = x.iter().map(|&t: &f64| 0.5 * (t + 1.0)).collect();
            let w01: Vec<f64> = w.iter().map(|&t: &f64| 0.5 * t).collect();
            return (rho, w01);
        }
        NodePattern::Jacobi => {
            // midpoints in the rho^2 measure; transforming du = 2 rho drho
            // gives the raw drho weights, renormalised to unit total mass
            let u: Vec<f64> = (0..n_rho).map(|k: usize| (2.0 * k as f64 + 1.0) / (2.0 * n_rho as f64)).collect();
            let rho: Vec<f64> = u.iter().map(|&t: &f64| t.sqrt()).collect();
            let raw: Vec<f64> = rho.iter().map(|&r: &f64| 1.0 / (2.0 * r * n_rho as f64)).collect();
            let total: f64 = raw.iter().sum();
            let w: Vec<f64> = raw.iter().map(|&t: &f64| t / total).collect();
            return (rho, w);
        }
    }
}

/// Gauss–Legendre abscissae and weights on [-1, 1] by Newton iteration on the
/// Legendre recurrence.
fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut x: Vec<f64> = vec![0.0; n];
    let mut w: Vec<f64> = vec![0.0; n];
    for i in 0..n {
        // Chebyshev-based starting guess
        let mut root: f64 = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut derivative: f64 = 0.0;
        for _ in 0..100 {
            // evaluate P_n and P_n' by the three-term recurrence
            let mut p0: f64 = 1.0;
            let mut p1: f64 = root;
            for k in 2..=n {
                let p2: f64 = ((2.0 * k as f64 - 1.0) * root * p1 - (k as f64 - 1.0) * p0) / k as f64;
                p0 = p1;
                p1 = p2;
            }
            let p_n: f64 = if n == 0 { 1.0 } else if n == 1 { root } else { p1 };
            derivative = n as f64 * (root * p_n - p0) / (root * root - 1.0);
            let delta: f64 = p_n / derivative;
            root -= delta;
            if delta.abs() < 1e-15 {
                break;
            }
        }
        x[i] = root;
        w[i] = 2.0 / ((1.0 - root * root) * derivative * derivative);
    }
    // Newton starting guesses run from +1 towards -1; present ascending
    x.reverse();
    w.reverse();
    return (x, w);
}

#[test]
fn test_partition_of_unity() {
    use approx::assert_abs_diff_eq;

    // total quadrature weight is (2 pi)^2 for every pattern, grid shape and nfp
    for pattern in [NodePattern::Uniform, NodePattern::Quad, NodePattern::Jacobi] {
        for (m_grid, n_grid, nfp) in [(4, 0, 1.0), (6, 3, 1.0), (5, 2, 3.0)] {
            let grid: Grid = Grid::new(m_grid, n_grid, nfp, pattern).unwrap();
            assert_abs_diff_eq!(grid.weights.sum(), 4.0 * PI * PI, epsilon = 1e-11);
        }
    }
}

#[test]
fn test_no_node_on_the_axis() {
    for pattern in [NodePattern::Uniform, NodePattern::Quad, NodePattern::Jacobi] {
        let grid: Grid = Grid::new(6, 2, 1.0, pattern).unwrap();
        for i in 0..grid.num_nodes {
            assert!(grid.nodes[[i, 0]] > 0.0);
            assert!(grid.nodes[[i, 0]] <= 1.0);
        }
    }
}

#[test]
fn test_gauss_legendre_polynomial_exactness() {
    use approx::assert_abs_diff_eq;

    // n-point Gauss quadrature integrates degree 2n-1 exactly:
    // with 4 points, integral of rho^7 over [0, 1] is 1/8
    let (rho, w): (Vec<f64>, Vec<f64>) = radial_nodes(4, NodePattern::Quad);
    let integral: f64 = rho.iter().zip(w.iter()).map(|(&r, &wk): (&f64, &f64)| wk * r.powi(7)).sum();
    assert_abs_diff_eq!(integral, 1.0 / 8.0, epsilon = 1e-13);
}

#[test]
fn test_jacobi_nodes_equispaced_in_rho_squared() {
    use approx::assert_abs_diff_eq;

    let (rho, _): (Vec<f64>, Vec<f64>) = radial_nodes(5, NodePattern::Jacobi);
    for pair in rho.windows(2) {
        let gap: f64 = pair[1] * pair[1] - pair[0] * pair[0];
        assert_abs_diff_eq!(gap, 0.2, epsilon = 1e-13);
    }
}

#[test]
fn test_zero_measure_grid_is_rejected() {
    let result: Result<Grid> = Grid::new(0, 0, 1.0, NodePattern::Uniform);
    assert!(matches!(result, Err(EquilibriumError::InvalidResolution(_))));
    let bad_nfp: Result<Grid> = Grid::new(4, 0, 0.0, NodePattern::Uniform);
    assert!(matches!(bad_nfp, Err(EquilibriumError::InvalidResolution(_))));
}
