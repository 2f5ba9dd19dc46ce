use super::subproblems::{solve_dogleg, solve_levenberg, update_radius};
use crate::error::Result;
use log::debug;
use ndarray::{Array1, Array2};
use ndarray_linalg::Norm;

/// Trust-region subproblem strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerMethod {
    Dogleg,
    LevenbergMarquardt,
}

/// How the solver stopped. These are outcomes, not errors; a non-finite
/// residual is the one fatal condition and surfaces as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// one of the ftol / xtol / gtol predicates fired
    Converged,
    /// the evaluation budget ran out; best point found is returned
    MaxIterationsReached,
    /// no acceptable step within the rejection budget
    Stalled,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// relative cost-reduction tolerance
    pub ftol: f64,
    /// step size tolerance, relative to the coefficient norm
    pub xtol: f64,
    /// projected-gradient infinity-norm tolerance
    pub gtol: f64,
    /// residual evaluation budget
    pub max_nfev: usize,
    pub method: OptimizerMethod,
    /// consecutive rejected steps before declaring a stall
    pub max_rejections: usize,
}

impl Default for SolverOptions {
    fn default() -> SolverOptions {
        return SolverOptions {
            ftol: 1e-6,
            xtol: 1e-6,
            gtol: 1e-6,
            max_nfev: 200,
            method: OptimizerMethod::Dogleg,
            max_rejections: 30,
        };
    }
}

#[derive(Debug, Clone)]
pub struct SolverResult {
    pub x: Array1<f64>,
    pub residual: Array1<f64>,
    pub cost: f64,
    pub grad_norm: f64,
    pub jacobian: Array2<f64>,
    pub nfev: usize,
    pub njev: usize,
    pub nit: usize,
    pub status: SolverStatus,
    pub message: String,
}

// acceptance threshold on the agreement ratio between actual and predicted
// cost reduction
const STEP_ACCEPT_RATIO: f64 = 0.15;

/// Trust-region nonlinear least squares over closures: minimises
/// `0.5 |fun(x)|^2` from `x0`, with termination checked in the order
/// ftol, xtol, gtol, and the evaluation budget overriding all three.
pub fn least_squares<F, J>(fun: F, jac: J, x0: &Array1<f64>, options: &SolverOptions) -> Result<SolverResult>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
    J: Fn(&Array1<f64>) -> Result<Array2<f64>>,
{
    let mut x: Array1<f64> = x0.clone();
    let mut f: Array1<f64> = fun(&x)?;
    let mut nfev: usize = 1;
    let mut cost: f64 = 0.5 * f.dot(&f);
    let mut jacobian: Array2<f64> = jac(&x)?;
    let mut njev: usize = 1;
    let mut gradient: Array1<f64> = jacobian.t().dot(&f);
    let mut grad_norm: f64 = gradient.norm_max();
    let mut nit: usize = 0;

    let mut radius: f64 = x.norm_l2();
    if radius == 0.0 {
        radius = 1.0;
    }

    let status: SolverStatus;
    let message: String;

    'outer: loop {
        if grad_norm < options.gtol {
            status = SolverStatus::Converged;
            message = format!("projected gradient norm {:.3e} below gtol {:.3e}", grad_norm, options.gtol);
            break 'outer;
        }
        if nfev >= options.max_nfev {
            status = SolverStatus::MaxIterationsReached;
            message = format!("residual evaluation budget of {} exhausted", options.max_nfev);
            break 'outer;
        }
        nit += 1;

        let mut rejections: usize = 0;
        loop {
            if nfev >= options.max_nfev {
                status = SolverStatus::MaxIterationsReached;
                message = format!("residual evaluation budget of {} exhausted", options.max_nfev);
                break 'outer;
            }

            let (step, hits_boundary): (Array1<f64>, bool) = match options.method {
                OptimizerMethod::Dogleg => solve_dogleg(&jacobian, &f, &gradient, radius)?,
                OptimizerMethod::LevenbergMarquardt => solve_levenberg(&jacobian, &f, &gradient, radius)?,
            };
            let step_norm: f64 = step.norm_l2();

            let x_trial: Array1<f64> = &x + &step;
            let f_trial: Array1<f64> = fun(&x_trial)?;
            nfev += 1;
            let cost_trial: f64 = 0.5 * f_trial.dot(&f_trial);

            let model: Array1<f64> = &f + &jacobian.dot(&step);
            let predicted_reduction: f64 = cost - 0.5 * model.dot(&model);
            let actual_reduction: f64 = cost - cost_trial;
            let ratio: f64 = if predicted_reduction > 0.0 { actual_reduction / predicted_reduction } else { 0.0 };

            radius = update_radius(radius, ratio, step_norm, hits_boundary);

            if ratio > STEP_ACCEPT_RATIO && actual_reduction > 0.0 {
                let cost_before: f64 = cost;
                x = x_trial;
                f = f_trial;
                cost = cost_trial;
                jacobian = jac(&x)?;
                njev += 1;
                gradient = jacobian.t().dot(&f);
                grad_norm = gradient.norm_max();
                debug!(
                    "iteration {}: cost {:.6e}, grad norm {:.3e}, radius {:.3e}, nfev {}",
                    nit, cost, grad_norm, radius, nfev
                );

                if actual_reduction <= options.ftol * cost_before {
                    status = SolverStatus::Converged;
                    message = format!(
                        "cost reduction {:.3e} below ftol {:.3e} of cost {:.3e}",
                        actual_reduction, options.ftol, cost_before
                    );
                    break 'outer;
                }
                if step_norm <= options.xtol * (x.norm_l2() + options.xtol) {
                    status = SolverStatus::Converged;
                    message = format!("step norm {:.3e} below xtol {:.3e}", step_norm, options.xtol);
                    break 'outer;
                }
                break;
            }

            rejections += 1;
            if rejections >= options.max_rejections || radius < 1e-14 * x.norm_l2().max(1.0) {
                status = SolverStatus::Stalled;
                message = format!("no acceptable step after {} rejections (radius {:.3e})", rejections, radius);
                break 'outer;
            }
        }
    }

    debug!("solver finished: {:?}, {}", status, message);
    return Ok(SolverResult {
        x,
        residual: f,
        cost,
        grad_norm,
        jacobian,
        nfev,
        njev,
        nit,
        status,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use ndarray_linalg::Solve;

    fn linear_problem() -> (Array2<f64>, Array1<f64>) {
        let a: Array2<f64> = Array2::from_shape_vec((4, 2), vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0, -1.0, 0.5]).unwrap();
        let b: Array1<f64> = Array1::from(vec![1.0, 4.0, 3.0, 0.5]);
        return (a, b);
    }

    #[test]
    fn test_converges_on_overdetermined_linear_least_squares() {
        for method in [OptimizerMethod::Dogleg, OptimizerMethod::LevenbergMarquardt] {
            let (a, b): (Array2<f64>, Array1<f64>) = linear_problem();
            let a_fun: Array2<f64> = a.clone();
            let a_jac: Array2<f64> = a.clone();
            let b_fun: Array1<f64> = b.clone();
            let fun = move |x: &Array1<f64>| -> Result<Array1<f64>> { Ok(a_fun.dot(x) - &b_fun) };
            let jac = move |_x: &Array1<f64>| -> Result<Array2<f64>> { Ok(a_jac.clone()) };

            let x0: Array1<f64> = Array1::from(vec![5.0, -3.0]);
            let options: SolverOptions = SolverOptions {
                method,
                ftol: 1e-12,
                xtol: 1e-12,
                gtol: 1e-10,
                ..SolverOptions::default()
            };
            let result: SolverResult = least_squares(fun, jac, &x0, &options).unwrap();
            assert_eq!(result.status, SolverStatus::Converged);

            let expected: Array1<f64> = a.t().dot(&a).solve(&a.t().dot(&b)).unwrap();
            for j in 0..2 {
                assert_abs_diff_eq!(result.x[j], expected[j], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_converges_on_rosenbrock_residuals() {
        // f = [10 (x1 - x0^2), 1 - x0] has its only zero at (1, 1)
        let fun = |x: &Array1<f64>| -> Result<Array1<f64>> { Ok(Array1::from(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])) };
        let jac = |x: &Array1<f64>| -> Result<Array2<f64>> {
            Ok(Array2::from_shape_vec((2, 2), vec![-20.0 * x[0], 10.0, -1.0, 0.0]).unwrap())
        };
        let x0: Array1<f64> = Array1::from(vec![-1.2, 1.0]);
        let options: SolverOptions = SolverOptions {
            ftol: 1e-14,
            xtol: 1e-14,
            gtol: 1e-10,
            max_nfev: 500,
            ..SolverOptions::default()
        };
        let result: SolverResult = least_squares(fun, jac, &x0, &options).unwrap();
        assert_eq!(result.status, SolverStatus::Converged);
        assert_abs_diff_eq!(result.x[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.x[1], 1.0, epsilon = 1e-6);
        assert!(result.cost < 1e-12);
    }

    #[test]
    fn test_budget_exhaustion_returns_best_point() {
        let fun = |x: &Array1<f64>| -> Result<Array1<f64>> { Ok(Array1::from(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])) };
        let jac = |x: &Array1<f64>| -> Result<Array2<f64>> {
            Ok(Array2::from_shape_vec((2, 2), vec![-20.0 * x[0], 10.0, -1.0, 0.0]).unwrap())
        };
        let x0: Array1<f64> = Array1::from(vec![-1.2, 1.0]);
        let options: SolverOptions = SolverOptions {
            max_nfev: 3,
            ftol: 1e-15,
            xtol: 1e-15,
            gtol: 1e-15,
            ..SolverOptions::default()
        };
        let result: SolverResult = least_squares(fun, jac, &x0, &options).unwrap();
        assert_eq!(result.status, SolverStatus::MaxIterationsReached);
        assert!(result.nfev <= 3);

        // cost never increases: only improving steps are accepted
        let f0: Array1<f64> = fun(&x0).unwrap();
        assert!(result.cost <= 0.5 * f0.dot(&f0));
    }

    #[test]
    fn test_starting_at_the_optimum_converges_immediately() {
        let (a, b): (Array2<f64>, Array1<f64>) = linear_problem();
        let expected: Array1<f64> = a.t().dot(&a).solve(&a.t().dot(&b)).unwrap();
        let a_fun: Array2<f64> = a.clone();
        let a_jac: Array2<f64> = a.clone();
        let fun = move |x: &Array1<f64>| -> Result<Array1<f64>> { Ok(a_fun.dot(x) - &b) };
        let jac = move |_x: &Array1<f64>| -> Result<Array2<f64>> { Ok(a_jac.clone()) };
        let result: SolverResult = least_squares(fun, jac, &expected, &SolverOptions::default()).unwrap();
        assert_eq!(result.status, SolverStatus::Converged);
        assert_eq!(result.nit, 0);
    }
}
