//! Persistence round trips and load-time validation of project documents.

use geosolve_core::{Correspondence, FeatureMatcher, GeosolveError, MatchRequest};
use geosolve_pipeline::presets::{
    base_model0_half_project, base_model0_project, base_model0_quarter_project,
};
use geosolve_pipeline::{Project, Stage};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::tempdir;

struct GridMatcher;

impl FeatureMatcher for GridMatcher {
    fn match_pair(&self, request: &MatchRequest<'_>) -> anyhow::Result<Vec<Correspondence>> {
        Ok((0..request.max_matches)
            .map(|k| {
                let u = 100.0 + 37.25 * k as f64;
                let v = 200.0 + 11.5 * k as f64;
                Correspondence::new([u, v], [u - 80.125, v + 3.0])
            })
            .collect())
    }
}

fn computed_baseline() -> Project {
    let mut project = base_model0_project().unwrap();
    project
        .compute_features(Path::new("unused"), &GridMatcher)
        .unwrap();
    project
}

#[test]
fn baseline_fixture_survives_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("project.json");

    let project = base_model0_project().unwrap();
    project.to_file(&path).unwrap();
    let loaded = Project::from_file(&path).unwrap();

    assert_eq!(loaded, project);
    let internal = loaded.models()[0].final_internal().unwrap();
    assert_eq!(internal, [48.3355e-3, 0.0093e-3, -0.0276e-3]);
    assert_eq!(loaded.models()[0].pixel_size(), 0.0085e-3);
    // the temporary file is renamed away
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn computed_observations_and_terrain_chain_round_trip() {
    let mut project = computed_baseline();
    assert_eq!(project.features.track_count(), 10);
    let seed = (0..10).map(|k| [k as f64 * 1.5, -2.0, 0.25]).collect();
    let idx = project.add_terrain_stage(seed).unwrap();
    assert_eq!(idx, 1);

    let loaded = Project::from_json(&project.to_json().unwrap()).unwrap();
    assert_eq!(loaded, project);
    assert_eq!(loaded.models()[1].type_tag(), "model_terrain");
    assert_eq!(loaded.models()[1].parent_index(), Some(0));
    assert_eq!(loaded.features.observations(0), project.features.observations(0));
    assert_eq!(loaded.log, project.log);
}

#[test]
fn scale_variants_differ_only_in_compute_scale() {
    let base = base_model0_project().unwrap();
    for (project, scale) in [
        (base_model0_half_project().unwrap(), 0.5),
        (base_model0_quarter_project().unwrap(), 0.25),
    ] {
        assert_eq!(project.features.compute_scale, scale);
        let mut record = project.features.to_record();
        record.compute_scale = 1.0;
        assert_eq!(record, base.features.to_record());
        assert_eq!(project.data_set(), base.data_set());
        assert_eq!(project.models(), base.models());
    }
}

fn document() -> Value {
    serde_json::from_str(&computed_baseline().to_json().unwrap()).unwrap()
}

fn load(value: &Value) -> Result<Project, GeosolveError> {
    Project::from_json(&value.to_string())
}

#[test]
fn unknown_model_tag_is_rejected() {
    let mut doc = document();
    doc["models"][0]["type_tag"] = json!("model_lidar");
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));
}

#[test]
fn camera_arity_mismatch_is_rejected() {
    let mut doc = document();
    doc["models"][0]["solutions"][0]["cameras"][1] = json!([0.0, 0.0, 269.0, 0.0, 0.0]);
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));
}

#[test]
fn camera_count_mismatch_is_rejected() {
    let mut doc = document();
    doc["models"][0]["solutions"][0]["cameras"] = json!([[0.0, 0.0, 269.0, 0.0, 0.0, 0.0]]);
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));
}

#[test]
fn observations_must_parallel_edges() {
    let mut doc = document();
    doc["features"]["observations"] = json!([]);
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));
}

#[test]
fn parent_must_precede_model() {
    let mut project = computed_baseline();
    project
        .add_terrain_stage(vec![[0.0, 0.0, 0.0]; 10])
        .unwrap();
    let mut doc: Value = serde_json::from_str(&project.to_json().unwrap()).unwrap();

    doc["models"][1]["parent_index"] = json!(1);
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));

    doc["models"][1]["parent_index"] = Value::Null;
    assert!(matches!(load(&doc), Err(GeosolveError::Schema(_))));
}

#[test]
fn skipping_a_link_is_accepted() {
    let mut project = computed_baseline();
    let copy = project.models()[0].clone();
    project.push_model(copy).unwrap();
    project.add_terrain_stage(vec![[0.0; 3]; 10]).unwrap();
    let mut doc: Value = serde_json::from_str(&project.to_json().unwrap()).unwrap();
    doc["models"][2]["parent_index"] = json!(0);
    let loaded = load(&doc).unwrap();
    assert_eq!(loaded.models()[2].parent_index(), Some(0));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = Project::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, GeosolveError::Io { .. }));
}

#[test]
fn malformed_json_is_schema_error() {
    assert!(matches!(
        Project::from_json("{\"metadata\": 3"),
        Err(GeosolveError::Schema(_))
    ));
}
