//! Ground point refinement through cameras held constant.

use crate::backend::{BackendSolveOptions, OptimBackend};
use crate::ir::{FactorKind, FixedMask, ProblemIR, ResidualBlock, RobustLoss};
use anyhow::{anyhow, ensure, Result};
use geosolve_core::{ExternalParams, InternalParams, TerrainPoint, Vec2, POINT_DOF};
use nalgebra::DVector;
use std::collections::HashMap;

/// One sighting of ground point `point` by camera `camera`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainObservation {
    pub camera: usize,
    pub point: usize,
    pub sensor: Vec2,
}

#[derive(Debug, Clone)]
pub struct TerrainDataset {
    pub num_points: usize,
    pub observations: Vec<TerrainObservation>,
}

impl TerrainDataset {
    pub fn new(num_points: usize, observations: Vec<TerrainObservation>) -> Result<Self> {
        ensure!(num_points > 0, "need at least one ground point");
        let mut seen = vec![false; num_points];
        for obs in &observations {
            ensure!(
                obs.point < num_points,
                "observation references point {} of {}",
                obs.point,
                num_points
            );
            seen[obs.point] = true;
        }
        if let Some(idx) = seen.iter().position(|s| !s) {
            return Err(anyhow!("ground point {idx} has no observations"));
        }
        Ok(Self {
            num_points,
            observations,
        })
    }
}

/// Constant cameras plus initial ground points.
#[derive(Debug, Clone)]
pub struct TerrainInit {
    pub internal: InternalParams,
    pub cameras: Vec<ExternalParams>,
    pub points: Vec<TerrainPoint>,
}

#[derive(Debug, Clone)]
pub struct TerrainSolveOptions {
    pub robust_loss: RobustLoss,
    pub weight: f64,
}

impl Default for TerrainSolveOptions {
    fn default() -> Self {
        Self {
            robust_loss: RobustLoss::None,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerrainResult {
    pub points: Vec<TerrainPoint>,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// False when the backend stopped on its iteration limit.
    pub converged: bool,
}

fn point_key(idx: usize) -> String {
    format!("point/{idx}")
}

/// Build IR for ground point refinement.
pub fn build_terrain_ir(
    dataset: &TerrainDataset,
    init: &TerrainInit,
    opts: &TerrainSolveOptions,
) -> Result<(ProblemIR, HashMap<String, DVector<f64>>)> {
    ensure!(
        init.points.len() == dataset.num_points,
        "initial point count {} != {}",
        init.points.len(),
        dataset.num_points
    );
    ensure!(opts.weight > 0.0, "observation weight must be positive");

    let mut ir = ProblemIR::new();
    let mut initial_map = HashMap::new();

    let point_ids: Vec<_> = init
        .points
        .iter()
        .enumerate()
        .map(|(k, p)| {
            initial_map.insert(point_key(k), DVector::from_row_slice(p));
            ir.add_param_block(point_key(k), POINT_DOF, FixedMask::all_free())
        })
        .collect();

    for obs in &dataset.observations {
        let camera = init
            .cameras
            .get(obs.camera)
            .ok_or_else(|| {
                anyhow!(
                    "observation references camera {} of {}",
                    obs.camera,
                    init.cameras.len()
                )
            })?;
        ir.add_residual_block(ResidualBlock::new(
            vec![point_ids[obs.point]],
            FactorKind::ReprojFrozenCamera {
                internal: init.internal,
                camera: *camera,
                observed: [obs.sensor.x, obs.sensor.y],
                w: opts.weight,
            },
            opts.robust_loss,
        ));
    }

    Ok((ir, initial_map))
}

/// Refine ground points with `backend`, cameras and intrinsics held constant.
pub fn optimize_terrain(
    backend: &dyn OptimBackend,
    dataset: &TerrainDataset,
    init: &TerrainInit,
    opts: &TerrainSolveOptions,
    backend_opts: &BackendSolveOptions,
) -> Result<TerrainResult> {
    let (ir, initial_map) = build_terrain_ir(dataset, init, opts)?;
    let solution = backend.solve(&ir, &initial_map, backend_opts)?;

    let points = (0..dataset.num_points)
        .map(|k| {
            let v = solution
                .params
                .get(&point_key(k))
                .ok_or_else(|| anyhow!("solution missing point {k}"))?;
            ensure!(v.len() == POINT_DOF, "point {k} has {} values", v.len());
            Ok([v[0], v[1], v[2]])
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TerrainResult {
        points,
        initial_cost: solution.initial_cost,
        final_cost: solution.final_cost,
        converged: solution.converged,
    })
}
