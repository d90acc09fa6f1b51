//! Joint camera pose and shared intrinsics refinement.
//!
//! Every correspondence between two cameras contributes one free ground point
//! and two reprojection residual blocks (one per camera). Points are seeded on
//! a horizontal datum plane from the current camera estimates.

use crate::backend::{BackendSolveOptions, OptimBackend};
use crate::ir::{FactorKind, FixedMask, ProblemIR, ResidualBlock, RobustLoss};
use crate::problems::intersect_datum;
use anyhow::{anyhow, ensure, Result};
use geosolve_core::{
    back_project, ExternalParams, InternalParams, TerrainPoint, Vec2, EXTERNAL_DOF, INTERNAL_DOF,
    POINT_DOF,
};
use nalgebra::DVector;
use std::collections::{BTreeSet, HashMap};

/// A correspondence between two cameras, in sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairObservation {
    pub camera_a: usize,
    pub camera_b: usize,
    pub sensor_a: Vec2,
    pub sensor_b: Vec2,
}

/// All correspondences of one refinement pass.
#[derive(Debug, Clone)]
pub struct PoseIntrinsicsDataset {
    pub num_cameras: usize,
    pub observations: Vec<PairObservation>,
}

impl PoseIntrinsicsDataset {
    pub fn new(num_cameras: usize, observations: Vec<PairObservation>) -> Result<Self> {
        ensure!(!observations.is_empty(), "need at least one correspondence");
        for (idx, obs) in observations.iter().enumerate() {
            ensure!(
                obs.camera_a < num_cameras && obs.camera_b < num_cameras,
                "correspondence {} references camera ({}, {}) of {}",
                idx,
                obs.camera_a,
                obs.camera_b,
                num_cameras
            );
            ensure!(
                obs.camera_a != obs.camera_b,
                "correspondence {} links camera {} with itself",
                idx,
                obs.camera_a
            );
        }
        Ok(Self {
            num_cameras,
            observations,
        })
    }

    /// Cameras touched by at least one correspondence.
    pub fn observed_cameras(&self) -> BTreeSet<usize> {
        self.observations
            .iter()
            .flat_map(|o| [o.camera_a, o.camera_b])
            .collect()
    }
}

/// Initial values for pose/intrinsics refinement.
#[derive(Debug, Clone)]
pub struct PoseIntrinsicsInit {
    pub internal: InternalParams,
    pub cameras: Vec<ExternalParams>,
}

/// Solve options for pose/intrinsics refinement.
#[derive(Debug, Clone)]
pub struct PoseIntrinsicsSolveOptions {
    pub robust_loss: RobustLoss,
    /// Per-index fixing of `[f, k1, k2]`.
    pub fix_internal: [bool; INTERNAL_DOF],
    /// Cameras held at their initial pose (gauge).
    pub fix_cameras: Vec<usize>,
    /// Hold the dominant baseline coordinate of the first free camera,
    /// removing the scale freedom left by fixing a single camera.
    pub fix_scale: bool,
    /// Height of the plane used to seed ground points.
    pub datum_height: f64,
    /// Weight applied to every residual block.
    pub weight: f64,
}

impl Default for PoseIntrinsicsSolveOptions {
    fn default() -> Self {
        Self {
            robust_loss: RobustLoss::None,
            fix_internal: [false; INTERNAL_DOF],
            fix_cameras: vec![0],
            fix_scale: true,
            datum_height: 0.0,
            weight: 1.0,
        }
    }
}

/// Result of pose/intrinsics refinement.
#[derive(Debug, Clone)]
pub struct PoseIntrinsicsResult {
    pub internal: InternalParams,
    pub cameras: Vec<ExternalParams>,
    /// Refined ground point of every correspondence, in dataset order.
    pub points: Vec<TerrainPoint>,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// False when the backend stopped on its iteration limit.
    pub converged: bool,
}

fn camera_key(idx: usize) -> String {
    format!("camera/{idx}")
}

fn point_key(idx: usize) -> String {
    format!("point/{idx}")
}

/// Seed one ground point per correspondence by intersecting both viewing rays
/// with the datum plane and averaging the intersections.
pub fn seed_points_on_datum(
    dataset: &PoseIntrinsicsDataset,
    init: &PoseIntrinsicsInit,
    datum_height: f64,
) -> Vec<TerrainPoint> {
    dataset
        .observations
        .iter()
        .map(|obs| {
            let internal = &init.internal;
            let (oa, da) = back_project(internal, &init.cameras[obs.camera_a], &obs.sensor_a);
            let (ob, db) = back_project(internal, &init.cameras[obs.camera_b], &obs.sensor_b);
            let pa = intersect_datum(&oa, &da, datum_height);
            let pb = intersect_datum(&ob, &db, datum_height);
            let p = (pa + pb) * 0.5;
            [p.x, p.y, p.z]
        })
        .collect()
}

/// Build IR for pose/intrinsics refinement.
pub fn build_pose_intrinsics_ir(
    dataset: &PoseIntrinsicsDataset,
    init: &PoseIntrinsicsInit,
    opts: &PoseIntrinsicsSolveOptions,
) -> Result<(ProblemIR, HashMap<String, DVector<f64>>)> {
    ensure!(
        init.cameras.len() == dataset.num_cameras,
        "camera count {} != num_cameras {}",
        init.cameras.len(),
        dataset.num_cameras
    );
    ensure!(opts.weight > 0.0, "observation weight must be positive");

    let mut ir = ProblemIR::new();
    let mut initial_map = HashMap::new();

    let internal_fixed: Vec<usize> = (0..INTERNAL_DOF).filter(|&i| opts.fix_internal[i]).collect();
    let internal_mask = FixedMask::fix_indices(&internal_fixed);
    let internal_id = ir.add_param_block("internal", INTERNAL_DOF, internal_mask);
    initial_map.insert("internal".to_string(), DVector::from_row_slice(&init.internal));

    let observed = dataset.observed_cameras();
    let gauge = if opts.fix_scale {
        scale_gauge(&observed, init, &opts.fix_cameras)
    } else {
        None
    };

    let mut camera_ids = HashMap::new();
    for cam in observed {
        let fixed = if opts.fix_cameras.contains(&cam) {
            FixedMask::all_fixed(EXTERNAL_DOF)
        } else if let Some((_, axis)) = gauge.filter(|&(c, _)| c == cam) {
            FixedMask::fix_indices(&[axis])
        } else {
            FixedMask::all_free()
        };
        let id = ir.add_param_block(camera_key(cam), EXTERNAL_DOF, fixed);
        initial_map.insert(camera_key(cam), DVector::from_row_slice(&init.cameras[cam]));
        camera_ids.insert(cam, id);
    }

    let seeds = seed_points_on_datum(dataset, init, opts.datum_height);
    for (k, (obs, seed)) in dataset.observations.iter().zip(&seeds).enumerate() {
        let point_id = ir.add_param_block(point_key(k), POINT_DOF, FixedMask::all_free());
        initial_map.insert(point_key(k), DVector::from_row_slice(seed));

        for (cam, sensor) in [(obs.camera_a, obs.sensor_a), (obs.camera_b, obs.sensor_b)] {
            ir.add_residual_block(ResidualBlock::new(
                vec![internal_id, camera_ids[&cam], point_id],
                FactorKind::ReprojFreeCamera {
                    observed: [sensor.x, sensor.y],
                    w: opts.weight,
                },
                opts.robust_loss,
            ));
        }
    }

    Ok((ir, initial_map))
}

/// Pick the first observed free camera and the centre coordinate along which
/// its baseline to the first observed fixed camera is largest.
fn scale_gauge(
    observed: &BTreeSet<usize>,
    init: &PoseIntrinsicsInit,
    fix_cameras: &[usize],
) -> Option<(usize, usize)> {
    let anchor = *observed.iter().find(|c| fix_cameras.contains(c))?;
    let free = *observed.iter().find(|c| !fix_cameras.contains(c))?;
    let (a, b) = (&init.cameras[anchor], &init.cameras[free]);
    let baseline = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let axis = (0..3).max_by(|&i, &j| baseline[i].abs().total_cmp(&baseline[j].abs()))?;
    (baseline[axis].abs() > 0.0).then_some((free, axis))
}

fn block<const N: usize>(params: &HashMap<String, DVector<f64>>, key: &str) -> Result<[f64; N]> {
    let v = params
        .get(key)
        .ok_or_else(|| anyhow!("solution missing parameter {key}"))?;
    ensure!(v.len() == N, "parameter {key} has {} values, expected {N}", v.len());
    let mut out = [0.0; N];
    out.copy_from_slice(v.as_slice());
    Ok(out)
}

/// Refine poses, intrinsics and correspondence points with `backend`.
pub fn optimize_pose_intrinsics(
    backend: &dyn OptimBackend,
    dataset: &PoseIntrinsicsDataset,
    init: &PoseIntrinsicsInit,
    opts: &PoseIntrinsicsSolveOptions,
    backend_opts: &BackendSolveOptions,
) -> Result<PoseIntrinsicsResult> {
    let (ir, initial_map) = build_pose_intrinsics_ir(dataset, init, opts)?;
    let solution = backend.solve(&ir, &initial_map, backend_opts)?;

    let internal = block::<INTERNAL_DOF>(&solution.params, "internal")?;
    let observed = dataset.observed_cameras();
    let cameras = (0..dataset.num_cameras)
        .map(|cam| {
            if observed.contains(&cam) {
                block::<EXTERNAL_DOF>(&solution.params, &camera_key(cam))
            } else {
                Ok(init.cameras[cam])
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let points = (0..dataset.observations.len())
        .map(|k| block::<POINT_DOF>(&solution.params, &point_key(k)))
        .collect::<Result<Vec<_>>>()?;

    Ok(PoseIntrinsicsResult {
        internal,
        cameras,
        points,
        initial_cost: solution.initial_cost,
        final_cost: solution.final_cost,
        converged: solution.converged,
    })
}
