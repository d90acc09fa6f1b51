//! The model chain: heterogeneous, resumable estimation stages.
//!
//! [`Model`] is the closed set of stages a project can hold. Every variant
//! implements [`Stage`], the lifecycle shared by all stages. Persisted models
//! carry a `type_tag` that selects the variant through [`Model::from_value`].

mod model0;
mod options;
mod terrain;

pub use model0::{Model0, Model0Solution};
pub use options::SolveOptions;
pub use terrain::{ModelTerrain, TerrainSolution};

use geosolve_core::{
    DataSet, ExternalParams, FeaturesGraph, GeosolveError, InternalParams, Real, Result,
    TerrainPoint,
};
use geosolve_optim::OptimBackend;
use serde::Serialize;
use serde_json::Value;

/// Inputs a stage needs to run one optimization pass.
pub struct SolveContext<'a> {
    pub features: &'a FeaturesGraph,
    /// The model referenced by the stage's `parent_index`, if any.
    pub parent: Option<&'a Model>,
    pub backend: &'a dyn OptimBackend,
    pub options: &'a SolveOptions,
}

/// Cost diagnostics of one successful `solve()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Number of scalar residuals in the problem.
    pub residuals: usize,
}

impl SolveReport {
    /// Root-mean-square reprojection error in pixels.
    pub fn rms_px(&self) -> f64 {
        if self.residuals == 0 {
            return 0.0;
        }
        (2.0 * self.final_cost / self.residuals as f64).sqrt()
    }

    pub fn summary(&self) -> String {
        format!(
            "cost {:.6e} -> {:.6e}, rms {:.3} px over {} residuals",
            self.initial_cost,
            self.final_cost,
            self.rms_px(),
            self.residuals
        )
    }
}

/// Lifecycle shared by every model stage.
pub trait Stage {
    /// Tag identifying the variant in persisted documents.
    fn type_tag(&self) -> &'static str;

    /// Index of the parent model in the owning project's chain.
    fn parent_index(&self) -> Option<usize>;

    /// Whether the stage can produce its first solution from its parent alone.
    fn bootstrapable(&self) -> bool;

    fn pixel_size(&self) -> Real;

    /// Number of entries in the solution history.
    fn solution_count(&self) -> usize;

    fn final_internal(&self) -> Result<InternalParams>;

    fn final_external(&self) -> Result<Vec<ExternalParams>>;

    fn final_terrain(&self) -> Result<Vec<TerrainPoint>>;

    /// Run one optimization pass and append exactly one solution on success.
    ///
    /// On error the solution history is unchanged.
    fn solve(&mut self, ctx: &SolveContext<'_>) -> Result<SolveReport>;
}

/// A stage of the refinement chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type_tag", rename_all = "snake_case")]
pub enum Model {
    Model0(Model0),
    ModelTerrain(ModelTerrain),
}

type ModelLoader = fn(Value) -> serde_json::Result<Model>;

fn load_model0(value: Value) -> serde_json::Result<Model> {
    serde_json::from_value(value).map(Model::Model0)
}

fn load_model_terrain(value: Value) -> serde_json::Result<Model> {
    serde_json::from_value(value).map(Model::ModelTerrain)
}

/// Known model variants, keyed by type tag.
const MODEL_REGISTRY: &[(&str, ModelLoader)] = &[
    (Model0::TYPE_TAG, load_model0),
    (ModelTerrain::TYPE_TAG, load_model_terrain),
];

impl Model {
    /// Type tags accepted by [`Model::from_value`].
    pub fn known_tags() -> impl Iterator<Item = &'static str> {
        MODEL_REGISTRY.iter().map(|(tag, _)| *tag)
    }

    /// Rebuild a model from a persisted entry, dispatching on its `type_tag`.
    pub fn from_value(mut value: Value) -> Result<Self> {
        let entry = value
            .as_object_mut()
            .ok_or_else(|| GeosolveError::schema("model entry is not an object"))?;
        let tag = match entry.remove("type_tag") {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(GeosolveError::schema(format!(
                    "type_tag must be a string, got {other}"
                )))
            }
            None => return Err(GeosolveError::schema("model entry has no type_tag")),
        };
        let loader = MODEL_REGISTRY
            .iter()
            .find(|(known, _)| *known == tag)
            .map(|(_, loader)| *loader)
            .ok_or_else(|| GeosolveError::schema(format!("unknown model type tag {tag:?}")))?;
        loader(value).map_err(|err| GeosolveError::schema(format!("{tag} model: {err}")))
    }

    fn as_stage(&self) -> &dyn Stage {
        match self {
            Model::Model0(m) => m,
            Model::ModelTerrain(m) => m,
        }
    }

    fn as_stage_mut(&mut self) -> &mut dyn Stage {
        match self {
            Model::Model0(m) => m,
            Model::ModelTerrain(m) => m,
        }
    }

    /// Check the model's stored arrays against the project's image set.
    pub fn check_against(&self, data_set: &DataSet) -> Result<()> {
        match self {
            Model::Model0(m) => m.check_against(data_set),
            Model::ModelTerrain(m) => m.check_against(data_set),
        }
    }
}

impl Stage for Model {
    fn type_tag(&self) -> &'static str {
        self.as_stage().type_tag()
    }

    fn parent_index(&self) -> Option<usize> {
        self.as_stage().parent_index()
    }

    fn bootstrapable(&self) -> bool {
        self.as_stage().bootstrapable()
    }

    fn pixel_size(&self) -> Real {
        self.as_stage().pixel_size()
    }

    fn solution_count(&self) -> usize {
        self.as_stage().solution_count()
    }

    fn final_internal(&self) -> Result<InternalParams> {
        self.as_stage().final_internal()
    }

    fn final_external(&self) -> Result<Vec<ExternalParams>> {
        self.as_stage().final_external()
    }

    fn final_terrain(&self) -> Result<Vec<TerrainPoint>> {
        self.as_stage().final_terrain()
    }

    fn solve(&mut self, ctx: &SolveContext<'_>) -> Result<SolveReport> {
        self.as_stage_mut().solve(ctx)
    }
}

impl From<Model0> for Model {
    fn from(model: Model0) -> Self {
        Model::Model0(model)
    }
}

impl From<ModelTerrain> for Model {
    fn from(model: ModelTerrain) -> Self {
        Model::ModelTerrain(model)
    }
}

/// Reject solver output containing NaN or infinity.
fn ensure_finite<'a>(what: &str, values: impl IntoIterator<Item = &'a f64>) -> Result<()> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(GeosolveError::numerical(format!("{what} contains non-finite values")))
    }
}

/// Reject a solve that stopped on its iteration limit.
fn ensure_converged(stage: &str, converged: bool, max_iters: usize) -> Result<()> {
    if converged {
        Ok(())
    } else {
        Err(GeosolveError::numerical(format!(
            "{stage}: solver did not converge within {max_iters} iterations"
        )))
    }
}
