//! Baseline projects for the `alinta-stockpile` survey.

use geosolve_core::{DataSet, ExternalParams, InternalParams, Real, Result};

use crate::model::Model0;
use crate::project::{Project, ProjectMetadata, SCHEMA_VERSION};

pub const BASE_FILENAMES: [&str; 2] = [
    "alinta-stockpile/DSC_5522.JPG",
    "alinta-stockpile/DSC_5521.JPG",
];
pub const BASE_ROWS: u32 = 2832;
pub const BASE_COLS: u32 = 4256;
/// Focal length and radial distortion `[f, k1, k2]`, metres.
pub const BASE_INTERNAL: InternalParams = [48.3355e-3, 0.0093e-3, -0.0276e-3];
pub const BASE_PIXEL_SIZE: Real = 0.0085e-3;
pub const BASE_CAMERA: ExternalParams = [0.0, 0.0, 269.0, 0.0, 0.0, 0.0];

/// Two images, one edge, ten matches, and an initial Model0.
pub fn base_model0_project() -> Result<Project> {
    let data_set = DataSet::new(
        BASE_FILENAMES.iter().map(|s| s.to_string()).collect(),
        BASE_ROWS,
        BASE_COLS,
    );
    let mut project = Project::new(data_set)?;
    project.metadata =
        ProjectMetadata::with_description(SCHEMA_VERSION, "alinta-stockpile baseline");
    project.features.add_edge(0, 1)?;
    project.push_model(Model0::new(
        BASE_INTERNAL,
        BASE_PIXEL_SIZE,
        vec![BASE_CAMERA; BASE_FILENAMES.len()],
    ))?;
    Ok(project)
}

/// Baseline with up to 200 matches per edge.
pub fn base_model0_200_project() -> Result<Project> {
    let mut project = base_model0_project()?;
    project.features.number_of_matches = 200;
    Ok(project)
}

/// Baseline matched at half resolution.
pub fn base_model0_half_project() -> Result<Project> {
    let mut project = base_model0_project()?;
    project.features.compute_scale = 0.5;
    Ok(project)
}

/// Baseline matched at quarter resolution.
pub fn base_model0_quarter_project() -> Result<Project> {
    let mut project = base_model0_project()?;
    project.features.compute_scale = 0.25;
    Ok(project)
}
