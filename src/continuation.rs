use crate::equilibrium::EquilibriumState;
use crate::error::{EquilibriumError, Result};
use crate::grid::Grid;
use crate::inputs::{InputConfig, StageConfig};
use crate::objective::{ForwardDifference, ObjectiveFunction};
use crate::optimize::{SolverResult, SolverStatus, least_squares};
use crate::perturbations::perturb;
use log::{info, warn};
use ndarray::{Array1, Array2};
use std::time::Instant;

/// Outcome of a whole continuation run. A failed run still carries every
/// stage solved so far, plus the best state of the failing stage.
#[derive(Debug, Clone)]
pub enum ContinuationStatus {
    Completed,
    Failed { stage: usize, error: EquilibriumError },
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: usize,
    pub solver: SolverResult,
    pub retried: bool,
    pub seconds: f64,
}

#[derive(Debug)]
pub struct ContinuationResult {
    /// the solved state after each stage, in order
    pub equilibria: Vec<EquilibriumState>,
    pub reports: Vec<StageReport>,
    pub status: ContinuationStatus,
}

impl ContinuationResult {
    pub fn final_state(&self) -> Option<&EquilibriumState> {
        return self.equilibria.last();
    }
}

/// Solve a family of equilibria by continuation: each stage updates the
/// resolution and the boundary / pressure ratios, warm-starts from the
/// previous solution through a perturbation step, and hands the projected
/// problem to the trust-region solver.
///
/// Configuration errors surface as `Err` before any stage is solved. A stage
/// that stalls is retried once from the unperturbed warm start; a second
/// stall ends the run with `ContinuationStatus::Failed`. An exhausted
/// evaluation budget is a warning only and the best state found moves the
/// run forward.
pub fn solve_continuation(config: &InputConfig) -> Result<ContinuationResult> {
    let stages: Vec<StageConfig> = config.expand_stages()?;
    let nfp: f64 = config.nfp_value();

    let first: &StageConfig = &stages[0];
    let mut state: EquilibriumState = EquilibriumState::new(
        config.sym,
        nfp,
        config.psi,
        first.l_res,
        first.m_res,
        first.n_res,
        config.indexing,
        config.profiles.clone(),
        config.boundary.clone(),
        config.axis.clone(),
        first.bdry_ratio,
        first.pres_ratio,
    )?;

    let mut equilibria: Vec<EquilibriumState> = Vec::new();
    let mut reports: Vec<StageReport> = Vec::new();
    // the previous stage's final Jacobian and residual scale, reused by the
    // next warm start when the problem dimensions are unchanged
    let mut carried: Option<(Array2<f64>, f64)> = None;

    for (i, stage) in stages.iter().enumerate() {
        let stage_start: Instant = Instant::now();
        info!(
            "continuation stage {}/{}: L={}, M={}, N={}, bdry_ratio={}, pres_ratio={}",
            i + 1,
            stages.len(),
            stage.l_res,
            stage.m_res,
            stage.n_res,
            stage.bdry_ratio,
            stage.pres_ratio
        );

        if i > 0 {
            state.change_resolution(stage.l_res, stage.m_res, stage.n_res)?;
            state.set_ratios(stage.bdry_ratio, stage.pres_ratio);
        }

        let grid: Grid = Grid::new(stage.m_grid, stage.n_grid, nfp, stage.node_pattern)?;
        let objective: ObjectiveFunction = ObjectiveFunction::new(stage.objective, &state, &grid, Box::new(ForwardDifference::default()))?;

        let x_plain: Array1<f64> = objective.initial_x(&state);
        let x_start: Array1<f64> = if i > 0 && stage.pert_order > 0 {
            // extrapolate the previous solution towards the updated problem
            match warm_start(&objective, &x_plain, stage.pert_order, carried.take()) {
                Ok(x) => x,
                Err(error) => {
                    return Ok(failed(equilibria, reports, i, error));
                }
            }
        } else {
            x_plain.clone()
        };

        let run = |x0: &Array1<f64>| -> Result<SolverResult> {
            return least_squares(
                |p: &Array1<f64>| objective.residual(p),
                |p: &Array1<f64>| objective.jacobian(p),
                x0,
                &stage.solver,
            );
        };

        let mut retried: bool = false;
        let mut result: SolverResult = match run(&x_start) {
            Ok(result) => result,
            Err(error) => return Ok(failed(equilibria, reports, i, error)),
        };

        if result.status != SolverStatus::Converged && i > 0 && stage.pert_order > 0 {
            info!(
                "stage {} finished with {:?} ({}); retrying once from the unperturbed warm start",
                i + 1,
                result.status,
                result.message
            );
            retried = true;
            let second: SolverResult = match run(&x_plain) {
                Ok(second) => second,
                Err(error) => return Ok(failed(equilibria, reports, i, error)),
            };
            if second.cost < result.cost {
                result = second;
            }
        }

        let seconds: f64 = stage_start.elapsed().as_secs_f64();
        info!(
            "stage {} done in {:.2} s: {:?}, cost {:.6e}, nfev {}",
            i + 1,
            seconds,
            result.status,
            result.cost,
            result.nfev
        );

        carried = Some((result.jacobian.clone(), objective.scale()));

        // store the best state found, whatever the status
        let y: Array1<f64> = objective.constraint.recover(&result.x);
        state.assign_state(&y)?;
        equilibria.push(state.clone());

        let status: SolverStatus = result.status;
        let message: String = result.message.clone();
        reports.push(StageReport {
            stage: i,
            solver: result,
            retried,
            seconds,
        });

        match status {
            SolverStatus::Converged => {}
            SolverStatus::MaxIterationsReached => {
                warn!("stage {} did not converge within its budget; continuing with the best state found", i + 1);
            }
            SolverStatus::Stalled => {
                return Ok(ContinuationResult {
                    equilibria,
                    reports,
                    status: ContinuationStatus::Failed {
                        stage: i,
                        error: EquilibriumError::StageFailed {
                            stage: i,
                            message,
                        },
                    },
                });
            }
        }
    }

    return Ok(ContinuationResult {
        equilibria,
        reports,
        status: ContinuationStatus::Completed,
    });
}

/// A carried Jacobian is reused as long as the problem dimensions are
/// unchanged, rescaled from the old residual normalisation to the new one;
/// otherwise (first stage after a resolution change) a fresh one is built.
fn warm_start(
    objective: &ObjectiveFunction,
    x: &Array1<f64>,
    order: usize,
    carried: Option<(Array2<f64>, f64)>,
) -> Result<Array1<f64>> {
    let jacobian: Array2<f64> = match carried {
        Some((previous, old_scale)) if previous.dim() == (objective.residual_len(), x.len()) => {
            previous * (old_scale / objective.scale())
        }
        _ => objective.jacobian(x)?,
    };
    return perturb(|p: &Array1<f64>| objective.residual(p), &jacobian, x, order);
}

fn failed(
    equilibria: Vec<EquilibriumState>,
    reports: Vec<StageReport>,
    stage: usize,
    error: EquilibriumError,
) -> ContinuationResult {
    return ContinuationResult {
        equilibria,
        reports,
        status: ContinuationStatus::Failed { stage, error },
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equilibrium::{AxisInput, BoundaryInput, ProfileInput};
    use crate::inputs::PerStage;

    fn vacuum_config() -> InputConfig {
        return InputConfig {
            sym: true,
            l_res: PerStage::Scalar(2),
            m_res: PerStage::Scalar(2),
            m_grid: PerStage::Scalar(3),
            ftol: PerStage::Scalar(1e-2),
            xtol: PerStage::Scalar(1e-12),
            gtol: PerStage::Scalar(1e-12),
            nfev: PerStage::Scalar(20),
            boundary: vec![
                BoundaryInput { m: 0, n: 0, r: 10.0, z: 0.0 },
                BoundaryInput { m: 1, n: 0, r: 1.0, z: 0.0 },
                BoundaryInput { m: -1, n: 0, r: 0.0, z: 1.0 },
            ],
            profiles: vec![ProfileInput { l: 0, pressure: 0.0, iota: 0.5 }],
            axis: vec![AxisInput { n: 0, r: 10.0, z: 0.0 }],
            ..InputConfig::default()
        };
    }

    #[test]
    fn test_invalid_configuration_fails_before_solving() {
        let mut config: InputConfig = vacuum_config();
        config.m_grid = PerStage::Scalar(1);
        assert!(solve_continuation(&config).is_err());
    }

    #[test]
    fn test_single_stage_run_completes_and_keeps_the_boundary() {
        use approx::assert_abs_diff_eq;

        let config: InputConfig = vacuum_config();
        let result: ContinuationResult = solve_continuation(&config).unwrap();
        assert!(matches!(result.status, ContinuationStatus::Completed));
        assert_eq!(result.equilibria.len(), 1);
        assert_eq!(result.reports.len(), 1);

        // the fixed-boundary constraint holds whatever the solver did
        let state: &EquilibriumState = result.final_state().unwrap();
        assert_abs_diff_eq!(state.aspect_ratio(), 10.0, epsilon = 1e-8);
    }

    #[test]
    fn test_warm_start_is_no_worse_than_plain_carry_over() {
        use crate::objective::ObjectiveKind;

        // solve a vacuum stage, then raise the pressure: the perturbed start
        // must not have a larger residual than the naive carry-over
        let config: InputConfig = vacuum_config();
        let result: ContinuationResult = solve_continuation(&config).unwrap();
        let mut state: EquilibriumState = result.final_state().unwrap().clone();

        state.profile_inputs = vec![
            ProfileInput { l: 0, pressure: 1.0, iota: 0.5 },
            ProfileInput { l: 2, pressure: -1.0, iota: 0.0 },
        ];
        state.set_ratios(1.0, 1.0);

        let grid: Grid = Grid::new(3, 0, 1.0, crate::grid::NodePattern::Uniform).unwrap();
        let objective: ObjectiveFunction =
            ObjectiveFunction::new(ObjectiveKind::ForceBalance, &state, &grid, Box::new(ForwardDifference::default())).unwrap();
        let x_plain: Array1<f64> = objective.initial_x(&state);
        let x_warm: Array1<f64> = warm_start(&objective, &x_plain, 1, None).unwrap();
        let cost_plain: f64 = objective.cost(&x_plain).unwrap();
        let cost_warm: f64 = objective.cost(&x_warm).unwrap();
        assert!(cost_warm <= cost_plain * (1.0 + 1e-12));
    }

    #[test]
    fn test_warm_start_reuses_a_carried_jacobian() {
        use crate::objective::ObjectiveKind;
        use approx::assert_abs_diff_eq;

        let config: InputConfig = vacuum_config();
        let result: ContinuationResult = solve_continuation(&config).unwrap();
        let state: EquilibriumState = result.final_state().unwrap().clone();

        let grid: Grid = Grid::new(3, 0, 1.0, crate::grid::NodePattern::Uniform).unwrap();
        let objective: ObjectiveFunction =
            ObjectiveFunction::new(ObjectiveKind::ForceBalance, &state, &grid, Box::new(ForwardDifference::default())).unwrap();
        let x: Array1<f64> = objective.initial_x(&state);

        // a carried Jacobian with matching dimensions replaces the fresh
        // finite-difference evaluation and yields the same extrapolation
        let jacobian: Array2<f64> = objective.jacobian(&x).unwrap();
        let reused: Array1<f64> = warm_start(&objective, &x, 1, Some((jacobian, objective.scale()))).unwrap();
        let fresh: Array1<f64> = warm_start(&objective, &x, 1, None).unwrap();
        for j in 0..fresh.len() {
            assert_abs_diff_eq!(reused[j], fresh[j], epsilon = 1e-10);
        }

        // a stale shape falls back to a fresh evaluation
        let stale: Array2<f64> = Array2::zeros((1, 1));
        let fallback: Array1<f64> = warm_start(&objective, &x, 1, Some((stale, 1.0))).unwrap();
        for j in 0..fresh.len() {
            assert_abs_diff_eq!(fallback[j], fresh[j], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_two_stage_run_with_pressure_ramp() {
        let mut config: InputConfig = vacuum_config();
        config.profiles = vec![
            ProfileInput { l: 0, pressure: 10.0, iota: 0.5 },
            ProfileInput { l: 2, pressure: -10.0, iota: 0.0 },
        ];
        config.pres_ratio = PerStage::List(vec![0.0, 1.0]);
        config.pert_order = PerStage::Scalar(1);

        let result: ContinuationResult = solve_continuation(&config).unwrap();
        assert!(matches!(result.status, ContinuationStatus::Completed));
        assert_eq!(result.equilibria.len(), 2);
        // the second stage carries the full pressure
        assert!((result.equilibria[1].pressure_l[0] - 10.0).abs() < 1e-12);
        assert!((result.equilibria[0].pressure_l[0]).abs() < 1e-12);
    }
}
