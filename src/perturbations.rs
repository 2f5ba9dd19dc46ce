use crate::error::Result;
use crate::optimize::subproblems::gauss_newton_step;
use ndarray::{Array1, Array2};

/// Warm-start extrapolation after a parameter change (boundary ratio,
/// pressure ratio, resolution step): correct the previous solution towards
/// the new problem's solution using a Jacobian that is already in hand.
///
/// Order 0 reuses the point unchanged. Order 1 applies one Gauss–Newton
/// correction against the new residual; order 2 applies a second correction
/// at the once-corrected point, picking up the quadratic part of the
/// parameter dependence. The Jacobian is frozen across both corrections,
/// which is first-order consistent and costs no extra derivative
/// evaluations.
pub fn perturb<F>(residual: F, jacobian: &Array2<f64>, x: &Array1<f64>, order: usize) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
{
    if order == 0 {
        return Ok(x.clone());
    }

    let f0: Array1<f64> = residual(x)?;
    let dx1: Array1<f64> = gauss_newton_step(jacobian, &f0)?;
    let x1: Array1<f64> = x + &dx1;
    if order == 1 {
        return Ok(x1);
    }

    let f1: Array1<f64> = residual(&x1)?;
    let dx2: Array1<f64> = gauss_newton_step(jacobian, &f1)?;
    return Ok(&x1 + &dx2);
}
