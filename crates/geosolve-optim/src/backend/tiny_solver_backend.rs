use crate::backend::{BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend};
use crate::factors::reprojection_model::{
    reproj_residual_free_camera_generic, reproj_residual_frozen_camera_generic,
};
use crate::ir::{FactorKind, ProblemIR, ResidualBlock, RobustLoss};
use anyhow::{anyhow, ensure, Result};
use log::{debug, warn};
use nalgebra::DVector;
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

/// tiny-solver backend adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TinySolverBackend;

impl TinySolverBackend {
    fn compile(&self, ir: &ProblemIR, initial: &HashMap<String, DVector<f64>>) -> Result<Problem> {
        ir.validate()?;

        let mut problem = Problem::new();

        for param in &ir.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!(
                    "initial values missing parameter {} (id {:?})",
                    param.name,
                    param.id
                )
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );
            ensure!(
                init.iter().all(|v| v.is_finite()),
                "initial values for {} are not finite",
                param.name
            );

            for idx in param.fixed.iter() {
                problem.fix_variable(&param.name, idx);
            }
        }

        for residual in &ir.residuals {
            let (factor, loss) = compile_factor(residual)?;
            let param_names: Vec<&str> = residual
                .params
                .iter()
                .map(|id| ir.params[id.0].name.as_str())
                .collect();
            problem.add_residual_block(residual.residual_dim, &param_names, factor, loss);
        }

        debug!(
            "compiled {} parameter blocks ({} free values), {} residual blocks",
            ir.params.len(),
            ir.free_dim(),
            ir.residuals.len()
        );
        Ok(problem)
    }
}

fn cost_at(problem: &Problem, values: &HashMap<String, DVector<f64>>) -> f64 {
    let param_blocks = problem.initialize_parameter_blocks(values);
    let residuals = problem.compute_residuals(&param_blocks, true);
    0.5 * residuals.as_ref().squared_norm_l2()
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution> {
        let problem = self.compile(ir, initial)?;
        let initial_cost = cost_at(&problem, initial);

        let optimizer = LevenbergMarquardtOptimizer::default();
        let options = to_optimizer_options(opts);
        let solution = optimizer
            .optimize(&problem, initial, Some(options))
            .ok_or_else(|| anyhow!("tiny-solver failed to converge"))?;

        let final_cost = cost_at(&problem, &solution);
        ensure!(
            final_cost.is_finite(),
            "tiny-solver produced a non-finite cost"
        );
        let converged = check_converged(&optimizer, &problem, &solution, final_cost, opts);
        if !converged {
            warn!("tiny-solver stopped after {} iterations without converging", opts.max_iters);
        }

        Ok(BackendSolution {
            params: solution,
            initial_cost,
            final_cost,
            converged,
        })
    }
}

/// Take one more step from `solution` and test its cost drop against the
/// termination thresholds.
fn check_converged(
    optimizer: &LevenbergMarquardtOptimizer,
    problem: &Problem,
    solution: &HashMap<String, DVector<f64>>,
    final_cost: f64,
    opts: &BackendSolveOptions,
) -> bool {
    if final_cost <= opts.min_error.unwrap_or(0.0) {
        return true;
    }
    let mut step = to_optimizer_options(opts);
    step.max_iteration = 1;
    let Some(next) = optimizer.optimize(problem, solution, Some(step)) else {
        debug!("no further step available from the returned values");
        return true;
    };
    let next_cost = cost_at(problem, &next);
    if !next_cost.is_finite() {
        return true;
    }
    let drop = final_cost - next_cost;
    debug!("convergence check: cost {final_cost:.6e} -> {next_cost:.6e}");
    drop <= opts.min_abs_decrease.unwrap_or(0.0)
        || drop <= opts.min_rel_decrease.unwrap_or(0.0) * final_cost
}

fn to_optimizer_options(opts: &BackendSolveOptions) -> OptimizerOptions {
    let mut options = OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        ..OptimizerOptions::default()
    };
    if let Some(solver) = opts.linear_solver {
        options.linear_solver_type = match solver {
            LinearSolverKind::SparseCholesky => LinearSolverType::SparseCholesky,
            LinearSolverKind::SparseQR => LinearSolverType::SparseQR,
        };
    }
    if let Some(v) = opts.min_abs_decrease {
        options.min_abs_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_rel_decrease {
        options.min_rel_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_error {
        options.min_error_threshold = v;
    }
    options
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
        RobustLoss::Arctan { scale } => {
            ensure!(scale > 0.0, "Arctan scale must be positive");
            Ok(Some(Box::new(ArctanLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn compile_factor(residual: &ResidualBlock) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    match &residual.factor {
        FactorKind::ReprojFreeCamera { observed, w } => {
            let factor = TinyFreeCameraFactor {
                observed: *observed,
                w: *w,
            };
            Ok((Box::new(factor), loss))
        }
        FactorKind::ReprojFrozenCamera {
            internal,
            camera,
            observed,
            w,
        } => {
            let factor = TinyFrozenCameraFactor {
                internal: *internal,
                camera: *camera,
                observed: *observed,
                w: *w,
            };
            Ok((Box::new(factor), loss))
        }
    }
}

#[derive(Debug, Clone)]
struct TinyFreeCameraFactor {
    observed: [f64; 2],
    w: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyFreeCameraFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 3, "expected [internal, camera, point] parameter blocks");
        let r = reproj_residual_free_camera_generic(
            params[0].as_view(), // internal
            params[1].as_view(), // camera
            params[2].as_view(), // point
            self.observed,
            self.w,
        );
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyFrozenCameraFactor {
    internal: [f64; 3],
    camera: [f64; 6],
    observed: [f64; 2],
    w: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyFrozenCameraFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [point] parameter block");
        let r = reproj_residual_frozen_camera_generic(
            params[0].as_view(),
            &self.internal,
            &self.camera,
            self.observed,
            self.w,
        );
        DVector::from_row_slice(r.as_slice())
    }
}
