use crate::error::{EquilibriumError, Result};
use ndarray::{Array1, Array2};
use ndarray_linalg::{LeastSquaresSvd, Norm, Solve};

/// Unconstrained Gauss–Newton step: the least-squares solution of
/// `J step = -f`.
pub fn gauss_newton_step(jacobian: &Array2<f64>, residual: &Array1<f64>) -> Result<Array1<f64>> {
    let rhs: Array1<f64> = -residual;
    let solution = jacobian.least_squares(&rhs).map_err(|e| EquilibriumError::LinAlg(e.to_string()))?;
    return Ok(solution.solution);
}

/// Dogleg solution of the trust-region subproblem: the Gauss–Newton step if
/// it fits, otherwise a point on the piecewise-linear path from the Cauchy
/// point towards the Gauss–Newton step, clipped to the boundary. The flag
/// reports whether the step ends on the boundary.
pub fn solve_dogleg(jacobian: &Array2<f64>, residual: &Array1<f64>, gradient: &Array1<f64>, radius: f64) -> Result<(Array1<f64>, bool)> {
    let newton: Array1<f64> = gauss_newton_step(jacobian, residual)?;
    if newton.norm_l2() <= radius {
        return Ok((newton, false));
    }

    // Cauchy point: the minimiser along the steepest-descent direction
    let jg: Array1<f64> = jacobian.dot(gradient);
    let alpha: f64 = gradient.dot(gradient) / jg.dot(&jg);
    let cauchy: Array1<f64> = -alpha * gradient;
    let cauchy_norm: f64 = cauchy.norm_l2();
    if cauchy_norm >= radius {
        let scaled: Array1<f64> = gradient * (-radius / gradient.norm_l2());
        return Ok((scaled, true));
    }

    // second dogleg segment: |cauchy + tau (newton - cauchy)| = radius
    let leg: Array1<f64> = &newton - &cauchy;
    let a: f64 = leg.dot(&leg);
    let b: f64 = 2.0 * cauchy.dot(&leg);
    let c: f64 = cauchy.dot(&cauchy) - radius * radius;
    let tau: f64 = (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a);
    let step: Array1<f64> = &cauchy + &(leg * tau);
    return Ok((step, true));
}

/// Levenberg–Marquardt solution of the same subproblem: damp the normal
/// equations until the step length matches the radius (log-space bisection on
/// the damping parameter).
pub fn solve_levenberg(jacobian: &Array2<f64>, residual: &Array1<f64>, gradient: &Array1<f64>, radius: f64) -> Result<(Array1<f64>, bool)> {
    let newton: Array1<f64> = gauss_newton_step(jacobian, residual)?;
    if newton.norm_l2() <= radius {
        return Ok((newton, false));
    }

    let n: usize = gradient.len();
    let jtj: Array2<f64> = jacobian.t().dot(jacobian);
    let neg_gradient: Array1<f64> = -gradient;

    let damped_step = |damping: f64| -> Result<Array1<f64>> {
        let mut system: Array2<f64> = jtj.clone();
        for i in 0..n {
            system[[i, i]] += damping;
        }
        return system.solve(&neg_gradient).map_err(|e| EquilibriumError::LinAlg(e.to_string()));
    };

    // |step(damping)| decreases monotonically from the Gauss-Newton length
    let mut low: f64 = 1e-16;
    let mut high: f64 = 1e16;
    let mut step: Array1<f64> = newton;
    for _ in 0..80 {
        let damping: f64 = (low * high).sqrt();
        step = damped_step(damping)?;
        if step.norm_l2() > radius {
            low = damping;
        } else {
            high = damping;
        }
    }
    return Ok((step, true));
}

/// Standard trust-region radius update from the agreement ratio between the
/// actual and the model cost reduction.
pub fn update_radius(radius: f64, ratio: f64, step_norm: f64, hits_boundary: bool) -> f64 {
    if ratio < 0.25 {
        return 0.25 * step_norm;
    }
    if ratio > 0.75 && hits_boundary {
        return 2.0 * radius;
    }
    return radius;
}

#[test]
fn test_gauss_newton_step_solves_linear_system() {
    use approx::assert_abs_diff_eq;

    // for f(x) = A x - b starting at x = 0, the GN step is the LSQ solution
    let a: Array2<f64> = Array2::from_shape_vec((3, 2), vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0]).unwrap();
    let b: Array1<f64> = Array1::from(vec![1.0, 4.0, 3.0]);
    let residual: Array1<f64> = -&b;
    let step: Array1<f64> = gauss_newton_step(&a, &residual).unwrap();
    let normal: Array2<f64> = a.t().dot(&a);
    let expected: Array1<f64> = normal.solve(&a.t().dot(&b)).unwrap();
    for j in 0..2 {
        assert_abs_diff_eq!(step[j], expected[j], epsilon = 1e-12);
    }
}

#[test]
fn test_dogleg_respects_the_radius() {
    use approx::assert_abs_diff_eq;

    let a: Array2<f64> = Array2::from_shape_vec((3, 2), vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0]).unwrap();
    let b: Array1<f64> = Array1::from(vec![10.0, 40.0, 30.0]);
    let residual: Array1<f64> = -&b;
    let gradient: Array1<f64> = a.t().dot(&residual);

    // a tight radius puts the step exactly on the boundary
    let (step, hits): (Array1<f64>, bool) = solve_dogleg(&a, &residual, &gradient, 0.5).unwrap();
    assert!(hits);
    assert_abs_diff_eq!(step.norm_l2(), 0.5, epsilon = 1e-10);

    // a huge radius returns the interior Gauss-Newton step
    let (full, interior_hits): (Array1<f64>, bool) = solve_dogleg(&a, &residual, &gradient, 1e6).unwrap();
    assert!(!interior_hits);
    let gn: Array1<f64> = gauss_newton_step(&a, &residual).unwrap();
    for j in 0..2 {
        assert_abs_diff_eq!(full[j], gn[j], epsilon = 1e-10);
    }
}

#[test]
fn test_levenberg_step_lands_on_the_boundary() {
    use approx::assert_abs_diff_eq;

    let a: Array2<f64> = Array2::from_shape_vec((3, 2), vec![1.0, 0.5, -0.3, 2.0, 1.0, 1.0]).unwrap();
    let b: Array1<f64> = Array1::from(vec![10.0, 40.0, 30.0]);
    let residual: Array1<f64> = -&b;
    let gradient: Array1<f64> = a.t().dot(&residual);
    let (step, hits): (Array1<f64>, bool) = solve_levenberg(&a, &residual, &gradient, 0.7).unwrap();
    assert!(hits);
    assert_abs_diff_eq!(step.norm_l2(), 0.7, epsilon = 1e-6);
}

#[test]
fn test_radius_update_rules() {
    use approx::assert_abs_diff_eq;

    // poor agreement shrinks below the attempted step
    assert_abs_diff_eq!(update_radius(1.0, 0.1, 0.8, true), 0.2, epsilon = 1e-15);
    // excellent agreement on the boundary doubles the radius
    assert_abs_diff_eq!(update_radius(1.0, 0.9, 1.0, true), 2.0, epsilon = 1e-15);
    // excellent agreement in the interior leaves it alone
    assert_abs_diff_eq!(update_radius(1.0, 0.9, 0.3, false), 1.0, epsilon = 1e-15);
    // moderate agreement leaves it alone
    assert_abs_diff_eq!(update_radius(1.0, 0.5, 1.0, true), 1.0, epsilon = 1e-15);
}
