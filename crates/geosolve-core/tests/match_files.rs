//! Feature graph computation against match files on disk.

use std::fs;
use std::sync::Arc;

use geosolve_core::{
    Correspondence, DataSet, FeaturesGraph, FeaturesRecord, GeosolveError, MatchFileMatcher,
};
use tempfile::tempdir;

fn data_set() -> Arc<DataSet> {
    Arc::new(DataSet::new(
        vec![
            "survey/IMG_1.JPG".to_string(),
            "survey/IMG_2.JPG".to_string(),
            "survey/IMG_3.JPG".to_string(),
        ],
        400,
        600,
    ))
}

#[test]
fn half_scale_matches_are_rescaled_capped_and_bounded() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("IMG_1_IMG_2.txt"),
        "# matched at half resolution\n\
         10 20 11 21\n\
         250 150 240 160\n\
         400 10 20 30\n\
         30 40 31 41\n",
    )
    .unwrap();

    let mut graph = FeaturesGraph::new(data_set());
    graph.compute_scale = 0.5;
    graph.number_of_matches = 2;
    graph.add_edge(1, 0).unwrap();
    graph
        .compute(dir.path(), &MatchFileMatcher::new(dir.path()))
        .unwrap();

    assert!(graph.is_computed());
    // (400, 10) lands at u = 800, outside the 600 px wide image
    assert_eq!(
        graph.observations(0),
        &[
            Correspondence::new([20.0, 40.0], [22.0, 42.0]),
            Correspondence::new([500.0, 300.0], [480.0, 320.0]),
        ]
    );
    assert!(graph.edge_coverage(0, 2) > 0.0);
}

#[test]
fn missing_match_file_leaves_graph_untouched() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("IMG_1_IMG_2.txt"), "1 2 3 4\n").unwrap();

    let mut graph = FeaturesGraph::new(data_set());
    graph.add_edge(0, 1).unwrap();
    graph.add_edge(1, 2).unwrap();
    let before = graph.clone();

    let err = graph
        .compute(dir.path(), &MatchFileMatcher::new(dir.path()))
        .unwrap_err();
    assert!(matches!(err, GeosolveError::Matcher { a: 1, b: 2, .. }));
    assert_eq!(graph, before);
}

#[test]
fn computed_graph_record_survives_json() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("IMG_3_IMG_1.txt"), "5.25 6.5 7.75 8.125\n").unwrap();

    let mut graph = FeaturesGraph::new(data_set());
    graph.add_edge(0, 2).unwrap();
    graph
        .compute(dir.path(), &MatchFileMatcher::new(dir.path()))
        .unwrap();
    assert_eq!(
        graph.observations(0),
        &[Correspondence::new([7.75, 8.125], [5.25, 6.5])]
    );

    let json = serde_json::to_string(&graph.to_record()).unwrap();
    let record: FeaturesRecord = serde_json::from_str(&json).unwrap();
    let restored = FeaturesGraph::from_record(data_set(), record).unwrap();
    assert_eq!(restored, graph);
}
