//! A survey project: one data set, one feature graph, and the model chain.
//!
//! The project file is the checkpoint between stages. Every CLI invocation
//! loads it, runs one stage, and writes it back; a failed stage never
//! reaches the disk.

mod types;

pub use types::{current_timestamp, LogEntry, ProjectMetadata};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geosolve_core::{
    DataSet, FeatureMatcher, FeaturesGraph, FeaturesRecord, GeosolveError, Result, TerrainPoint,
};
use geosolve_optim::OptimBackend;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Model, ModelTerrain, SolveContext, SolveOptions, SolveReport, Stage};

/// Newest document layout this build reads and the one it writes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub metadata: ProjectMetadata,
    data_set: Arc<DataSet>,
    pub features: FeaturesGraph,
    models: Vec<Model>,
    /// Operation log (lightweight audit trail).
    pub log: Vec<LogEntry>,
}

#[derive(Serialize)]
struct ProjectDocumentRef<'a> {
    metadata: &'a ProjectMetadata,
    data_set: &'a DataSet,
    features: FeaturesRecord,
    models: &'a [Model],
    log: &'a [LogEntry],
}

#[derive(Deserialize)]
struct ProjectDocument {
    metadata: ProjectMetadata,
    data_set: DataSet,
    features: FeaturesRecord,
    models: Vec<Value>,
    #[serde(default)]
    log: Vec<LogEntry>,
}

impl Project {
    /// Create a project with an empty feature graph and no models.
    pub fn new(data_set: DataSet) -> Result<Self> {
        data_set.validate()?;
        let data_set = Arc::new(data_set);
        Ok(Self {
            metadata: ProjectMetadata::new(SCHEMA_VERSION),
            features: FeaturesGraph::new(Arc::clone(&data_set)),
            data_set,
            models: Vec::new(),
            log: Vec::new(),
        })
    }

    pub fn data_set(&self) -> &Arc<DataSet> {
        &self.data_set
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Append a model to the chain and return its index.
    ///
    /// The model's parent, if any, must already be in the chain.
    pub fn push_model(&mut self, model: impl Into<Model>) -> Result<usize> {
        let model = model.into();
        let position = self.models.len();
        check_parent_link(position, &model)?;
        model.check_against(&self.data_set).map_err(|err| match err {
            GeosolveError::Schema(msg) => GeosolveError::Validation(msg),
            other => other,
        })?;
        self.log.push(LogEntry::success(format!(
            "add {} model {position}",
            model.type_tag()
        )));
        self.models.push(model);
        self.metadata.touch();
        Ok(position)
    }

    /// Match every edge of the feature graph and record the outcome.
    pub fn compute_features(
        &mut self,
        data_dir: &Path,
        matcher: &dyn FeatureMatcher,
    ) -> Result<()> {
        let outcome = self.features.compute(data_dir, matcher);
        match &outcome {
            Ok(()) => self.log.push(LogEntry::success_with_notes(
                "compute_features",
                format!(
                    "{} edges, {} correspondences",
                    self.features.edges().len(),
                    self.features.track_count()
                ),
            )),
            Err(err) => self.log.push(LogEntry::failure("compute_features", err.to_string())),
        }
        self.metadata.touch();
        outcome
    }

    /// Run one optimization pass of model `idx`, resolving its parent by index.
    pub fn solve_model(
        &mut self,
        idx: usize,
        backend: &dyn OptimBackend,
        options: &SolveOptions,
    ) -> Result<SolveReport> {
        if idx >= self.models.len() {
            return Err(GeosolveError::validation(format!(
                "no model {idx} in a chain of {}",
                self.models.len()
            )));
        }
        let (earlier, rest) = self.models.split_at_mut(idx);
        let model = &mut rest[0];
        let parent = match model.parent_index() {
            Some(p) => Some(earlier.get(p).ok_or_else(|| {
                GeosolveError::validation(format!("model {idx} refers to parent {p} not before it"))
            })?),
            None => None,
        };
        let operation = format!("solve {} model {idx}", model.type_tag());
        info!("{operation}");

        let ctx = SolveContext {
            features: &self.features,
            parent,
            backend,
            options,
        };
        let outcome = model.solve(&ctx);

        match &outcome {
            Ok(report) => self
                .log
                .push(LogEntry::success_with_notes(operation, report.summary())),
            Err(err) => self.log.push(LogEntry::failure(operation, err.to_string())),
        }
        self.metadata.touch();
        outcome
    }

    /// Solve the last model of the chain.
    pub fn solve_latest(
        &mut self,
        backend: &dyn OptimBackend,
        options: &SolveOptions,
    ) -> Result<SolveReport> {
        let last = self
            .models
            .len()
            .checked_sub(1)
            .ok_or_else(|| GeosolveError::validation("project has no models"))?;
        self.solve_model(last, backend, options)
    }

    /// Append a terrain stage frozen from the current last model and seeded
    /// with `seed`, one point per tracked correspondence.
    pub fn add_terrain_stage(&mut self, seed: Vec<TerrainPoint>) -> Result<usize> {
        let parent_index = self
            .models
            .len()
            .checked_sub(1)
            .ok_or_else(|| GeosolveError::validation("terrain stage needs a parent model"))?;
        let mut terrain = ModelTerrain::from_parent(parent_index, &self.models[parent_index])?;
        terrain.seed(seed, &self.features)?;
        self.push_model(terrain)
    }

    pub fn to_json(&self) -> Result<String> {
        let document = ProjectDocumentRef {
            metadata: &self.metadata,
            data_set: &self.data_set,
            features: self.features.to_record(),
            models: &self.models,
            log: &self.log,
        };
        serde_json::to_string_pretty(&document)
            .map_err(|err| GeosolveError::schema(format!("cannot encode project: {err}")))
    }

    /// Parse and validate a project document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: ProjectDocument = serde_json::from_str(json)
            .map_err(|err| GeosolveError::schema(err.to_string()))?;

        if document.metadata.schema_version > SCHEMA_VERSION {
            return Err(GeosolveError::schema(format!(
                "project schema version {} is newer than supported version {}",
                document.metadata.schema_version, SCHEMA_VERSION
            )));
        }

        document
            .data_set
            .validate()
            .map_err(|err| GeosolveError::schema(err.to_string()))?;
        let data_set = Arc::new(document.data_set);
        let features = FeaturesGraph::from_record(Arc::clone(&data_set), document.features)?;

        let models = document
            .models
            .into_iter()
            .map(Model::from_value)
            .collect::<Result<Vec<_>>>()?;
        for (position, model) in models.iter().enumerate() {
            check_parent_link(position, model)
                .map_err(|err| GeosolveError::schema(err.to_string()))?;
            model.check_against(&data_set)?;
        }

        Ok(Self {
            metadata: document.metadata,
            data_set,
            features,
            models,
            log: document.log,
        })
    }

    /// Write the project to `path` through a sibling temporary file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let tmp = temporary_sibling(path);
        fs::write(&tmp, json).map_err(|err| GeosolveError::io(&tmp, err))?;
        fs::rename(&tmp, path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            GeosolveError::io(path, err)
        })?;
        info!("saved project to {}", path.display());
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|err| GeosolveError::io(path, err))?;
        let project = Self::from_json(&json)?;
        info!(
            "loaded project from {} ({} images, {} models)",
            path.display(),
            project.data_set.len(),
            project.models.len()
        );
        Ok(project)
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project.json".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Check the chain invariant for the model at `position`.
fn check_parent_link(position: usize, model: &Model) -> Result<()> {
    match (model.parent_index(), model) {
        (None, Model::ModelTerrain(_)) => Err(GeosolveError::validation(format!(
            "terrain model {position} has no parent"
        ))),
        (Some(p), _) if p >= position => Err(GeosolveError::validation(format!(
            "model {position} refers to parent {p}, which does not precede it"
        ))),
        (Some(p), _) => {
            if p + 1 != position {
                warn!("model {position} refers to parent {p} rather than its predecessor");
            }
            Ok(())
        }
        (None, _) => Ok(()),
    }
}
