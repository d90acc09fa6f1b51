//! Model0 then ModelTerrain on a synthetic two-camera survey.

use std::collections::HashMap;
use std::path::Path;

use anyhow::anyhow;
use geosolve_core::{
    project_point, Correspondence, DataSet, ExternalParams, FeatureMatcher, FeaturesGraph,
    GeosolveError, InternalParams, MatchRequest, TerrainPoint,
};
use geosolve_optim::ir::ProblemIR;
use geosolve_optim::{BackendSolution, BackendSolveOptions, OptimBackend, TinySolverBackend};
use geosolve_pipeline::{
    Model, Model0, ModelTerrain, Project, SolveContext, SolveOptions, Stage,
};
use nalgebra::DVector;

const ROWS: u32 = 2832;
const COLS: u32 = 4256;
const PIXEL_SIZE: f64 = 8.5e-6;
const INTERNAL: InternalParams = [0.05, 0.0, 0.0];

fn cameras_gt() -> Vec<ExternalParams> {
    vec![
        [0.0, 0.0, 100.0, 0.01, -0.02, 0.0],
        [30.0, 2.0, 101.0, -0.01, 0.015, 0.02],
    ]
}

fn terrain_gt() -> Vec<TerrainPoint> {
    let mut points = Vec::new();
    for iy in -2..=2 {
        for ix in -2..=3 {
            let z = 1.5 * ((ix + iy) % 3) as f64;
            points.push([ix as f64 * 6.0 + 10.0, iy as f64 * 7.0, z]);
        }
    }
    points
}

fn pixel(camera: &ExternalParams, point: &TerrainPoint) -> [f64; 2] {
    let s = project_point(&INTERNAL, camera, point);
    [
        s.x / PIXEL_SIZE + f64::from(COLS) / 2.0,
        s.y / PIXEL_SIZE + f64::from(ROWS) / 2.0,
    ]
}

/// Reports the exact projections of the ground truth scene.
struct SceneMatcher;

impl FeatureMatcher for SceneMatcher {
    fn match_pair(&self, request: &MatchRequest<'_>) -> anyhow::Result<Vec<Correspondence>> {
        let cameras = cameras_gt();
        Ok(terrain_gt()
            .iter()
            .map(|p| {
                Correspondence::new(
                    pixel(&cameras[request.index_a], p),
                    pixel(&cameras[request.index_b], p),
                )
            })
            .collect())
    }
}

struct DivergingBackend;

impl OptimBackend for DivergingBackend {
    fn solve(
        &self,
        _ir: &ProblemIR,
        _initial: &HashMap<String, DVector<f64>>,
        _opts: &BackendSolveOptions,
    ) -> anyhow::Result<BackendSolution> {
        Err(anyhow!("diverged"))
    }
}

fn data_set() -> DataSet {
    DataSet::new(vec!["left.jpg".into(), "right.jpg".into()], ROWS, COLS)
}

fn scene_project(compute: bool) -> Project {
    let mut project = Project::new(data_set()).unwrap();
    project.features.number_of_matches = 100;
    project.features.add_edge(0, 1).unwrap();
    if compute {
        project
            .compute_features(Path::new("unused"), &SceneMatcher)
            .unwrap();
    }
    let mut start = cameras_gt();
    start[1][0] += 0.5;
    start[1][3] += 0.002;
    start[1][5] -= 0.003;
    project
        .push_model(Model0::new(INTERNAL, PIXEL_SIZE, start))
        .unwrap();
    project
}

fn options() -> SolveOptions {
    SolveOptions {
        fix_internal: true,
        ..SolveOptions::default()
    }
}

#[test]
fn model0_then_terrain_converges() {
    let mut project = scene_project(true);
    assert_eq!(project.features.track_count(), 30);

    let report = project.solve_latest(&TinySolverBackend, &options()).unwrap();
    assert!(report.final_cost < report.initial_cost);
    assert!(report.rms_px() < 0.1, "model0 rms {}", report.rms_px());
    assert_eq!(project.models()[0].solution_count(), 2);
    // gauge camera and fixed intrinsics stay put
    let cameras = project.models()[0].final_external().unwrap();
    assert_eq!(cameras[0], cameras_gt()[0]);
    assert_eq!(project.models()[0].final_internal().unwrap(), INTERNAL);

    let seed = terrain_gt()
        .iter()
        .map(|p| [p[0] + 0.7, p[1] - 0.4, p[2] + 1.0])
        .collect();
    let idx = project.add_terrain_stage(seed).unwrap();
    let report = project.solve_model(idx, &TinySolverBackend, &options()).unwrap();
    assert!(report.final_cost < report.initial_cost);
    assert!(report.rms_px() < 0.1, "terrain rms {}", report.rms_px());

    let terrain = project.models()[idx].final_terrain().unwrap();
    assert_eq!(terrain.len(), 30);
    assert_eq!(project.models()[idx].solution_count(), 2);
    assert!(project.log.iter().all(|entry| entry.success));
}

#[test]
fn model0_requires_computed_features() {
    let mut project = scene_project(false);
    let err = project.solve_latest(&TinySolverBackend, &options()).unwrap_err();
    assert!(matches!(err, GeosolveError::Validation(_)));
    assert_eq!(project.models()[0].solution_count(), 1);
    assert!(!project.log.last().unwrap().success);
}

#[test]
fn model0_requires_edges() {
    let mut model: Model = Model0::new(INTERNAL, PIXEL_SIZE, cameras_gt()).into();
    let mut features = FeaturesGraph::new(data_set().into());
    features.compute(Path::new("unused"), &SceneMatcher).unwrap();
    assert!(features.is_computed());
    let opts = options();
    let ctx = SolveContext {
        features: &features,
        parent: None,
        backend: &TinySolverBackend,
        options: &opts,
    };
    match model.solve(&ctx) {
        Err(GeosolveError::Validation(msg)) => assert!(msg.contains("no edges"), "{msg}"),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(model.solution_count(), 1);
}

#[test]
fn backend_failure_appends_nothing() {
    let mut project = scene_project(true);
    let err = project.solve_latest(&DivergingBackend, &options()).unwrap_err();
    assert!(matches!(err, GeosolveError::Numerical(_)));
    assert!(err.to_string().contains("diverged"));
    assert_eq!(project.models()[0].solution_count(), 1);

    let entry = project.log.last().unwrap();
    assert!(!entry.success);
    assert!(entry.operation.contains("solve model0 model 0"));
}

#[test]
fn iteration_limit_appends_nothing() {
    let mut project = scene_project(true);
    let mut opts = options();
    opts.backend = BackendSolveOptions {
        max_iters: 1,
        min_abs_decrease: Some(0.0),
        min_rel_decrease: Some(0.0),
        min_error: Some(0.0),
        ..BackendSolveOptions::default()
    };

    let err = project.solve_latest(&TinySolverBackend, &opts).unwrap_err();
    assert!(matches!(err, GeosolveError::Numerical(_)));
    assert!(err.to_string().contains("did not converge"), "{err}");
    assert_eq!(project.models()[0].solution_count(), 1);
    assert!(!project.log.last().unwrap().success);
}

#[test]
fn terrain_backend_failure_appends_nothing() {
    let mut project = scene_project(true);
    let idx = project.add_terrain_stage(terrain_gt()).unwrap();
    let err = project
        .solve_model(idx, &DivergingBackend, &options())
        .unwrap_err();
    assert!(matches!(err, GeosolveError::Numerical(_)));
    assert_eq!(project.models()[idx].solution_count(), 1);

    let entry = project.log.last().unwrap();
    assert!(!entry.success);
    assert!(entry.operation.contains("solve model_terrain model 1"));
}

#[test]
fn solved_chain_survives_json_round_trip() {
    let mut project = scene_project(true);
    project.solve_latest(&TinySolverBackend, &options()).unwrap();
    let seed = terrain_gt()
        .iter()
        .map(|p| [p[0] - 0.3, p[1] + 0.6, p[2] + 0.8])
        .collect();
    let idx = project.add_terrain_stage(seed).unwrap();
    project.solve_model(idx, &TinySolverBackend, &options()).unwrap();
    assert_eq!(project.models()[0].solution_count(), 2);
    assert_eq!(project.models()[idx].solution_count(), 2);

    let loaded = Project::from_json(&project.to_json().unwrap()).unwrap();
    assert_eq!(loaded, project);
    for (a, b) in loaded.models().iter().zip(project.models()) {
        assert_eq!(a.solution_count(), b.solution_count());
    }
    assert_eq!(
        loaded.models()[0].final_external().unwrap(),
        project.models()[0].final_external().unwrap()
    );
    assert_eq!(
        loaded.models()[idx].final_terrain().unwrap(),
        project.models()[idx].final_terrain().unwrap()
    );
    assert_eq!(loaded.log.len(), project.log.len());
}

#[test]
fn terrain_requires_parent_and_seed() {
    let project = scene_project(true);
    let parent = &project.models()[0];
    let opts = options();

    let mut unseeded: Model = ModelTerrain::from_parent(0, parent).unwrap().into();
    let with_parent = SolveContext {
        features: &project.features,
        parent: Some(parent),
        backend: &TinySolverBackend,
        options: &opts,
    };
    assert!(matches!(
        unseeded.solve(&with_parent),
        Err(GeosolveError::Validation(_))
    ));

    let mut seeded = ModelTerrain::from_parent(0, parent).unwrap();
    seeded.seed(terrain_gt(), &project.features).unwrap();
    let mut seeded: Model = seeded.into();
    let orphan = SolveContext {
        parent: None,
        ..with_parent
    };
    assert!(matches!(seeded.solve(&orphan), Err(GeosolveError::Validation(_))));
    assert_eq!(seeded.solution_count(), 1);
}

#[test]
fn terrain_rejects_unsolved_parent() {
    let project = scene_project(true);
    let mut doc = serde_json::to_value(&project.models()[0]).unwrap();
    let mut seeded = ModelTerrain::from_parent(0, &project.models()[0]).unwrap();
    seeded.seed(terrain_gt(), &project.features).unwrap();
    let mut seeded: Model = seeded.into();

    doc["solutions"] = serde_json::json!([]);
    let unsolved = Model::from_value(doc).unwrap();
    let opts = options();
    let ctx = SolveContext {
        features: &project.features,
        parent: Some(&unsolved),
        backend: &TinySolverBackend,
        options: &opts,
    };
    assert!(matches!(seeded.solve(&ctx), Err(GeosolveError::Validation(_))));
    assert!(matches!(
        ModelTerrain::from_parent(0, &unsolved),
        Err(GeosolveError::Validation(_))
    ));
}

#[test]
fn seed_count_must_match_tracks() {
    let project = scene_project(true);
    let mut terrain = ModelTerrain::from_parent(0, &project.models()[0]).unwrap();
    let err = terrain
        .seed(vec![[0.0; 3]; 29], &project.features)
        .unwrap_err();
    assert!(matches!(err, GeosolveError::Validation(_)));
    assert_eq!(terrain.solution_count(), 0);
}
