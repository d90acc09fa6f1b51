//! Model chain orchestration and project persistence for `geosolve`.
//!
//! A [`Project`] holds one [`geosolve_core::DataSet`], its feature graph, and
//! an ordered chain of [`Model`] stages:
//!
//! ```no_run
//! use geosolve_optim::TinySolverBackend;
//! use geosolve_pipeline::{presets, SolveOptions};
//! # fn main() -> geosolve_core::Result<()> {
//! let mut project = presets::base_model0_project()?;
//! // ... compute features ...
//! project.solve_latest(&TinySolverBackend, &SolveOptions::default())?;
//! project.to_file("project.json")?;
//! # Ok(())
//! # }
//! ```

pub mod model;
pub mod presets;
pub mod project;

pub use model::{
    Model, Model0, Model0Solution, ModelTerrain, SolveContext, SolveOptions, SolveReport, Stage,
    TerrainSolution,
};
pub use project::{LogEntry, Project, ProjectMetadata, SCHEMA_VERSION};
