use geosolve_core::{
    DataSet, ExternalParams, FeaturesGraph, GeosolveError, InternalParams, Real, Result,
    TerrainPoint,
};
use geosolve_optim::problems::terrain::{
    optimize_terrain, TerrainDataset, TerrainInit, TerrainObservation, TerrainSolveOptions,
};
use log::info;
use serde::{Deserialize, Serialize};

use super::{ensure_converged, ensure_finite, Model, SolveContext, SolveReport, Stage};

/// One entry of the terrain solution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSolution {
    /// One ground point per tracked correspondence.
    pub terrain: Vec<TerrainPoint>,
}

/// Ground point refinement through cameras frozen from a parent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTerrain {
    pub parent_index: Option<usize>,
    cameras: Vec<ExternalParams>,
    internal: InternalParams,
    pixel_size: Real,
    solutions: Vec<TerrainSolution>,
}

impl ModelTerrain {
    pub const TYPE_TAG: &'static str = "model_terrain";

    /// Freeze the final cameras and intrinsics of `parent`, found at
    /// `parent_index` in the chain.
    pub fn from_parent(parent_index: usize, parent: &Model) -> Result<Self> {
        if parent.solution_count() == 0 {
            return Err(GeosolveError::validation(format!(
                "parent model {parent_index} has no solution"
            )));
        }
        Ok(Self {
            parent_index: Some(parent_index),
            cameras: parent.final_external()?,
            internal: parent.final_internal()?,
            pixel_size: parent.pixel_size(),
            solutions: Vec::new(),
        })
    }

    /// Install externally triangulated seeds as the first solution.
    pub fn seed(&mut self, terrain: Vec<TerrainPoint>, features: &FeaturesGraph) -> Result<()> {
        if !self.solutions.is_empty() {
            return Err(GeosolveError::validation("terrain model is already seeded"));
        }
        let expected = features.track_count();
        if terrain.len() != expected {
            return Err(GeosolveError::validation(format!(
                "{} seed points for {} tracked correspondences",
                terrain.len(),
                expected
            )));
        }
        ensure_finite("terrain seed", terrain.iter().flatten())
            .map_err(|_| GeosolveError::validation("terrain seed contains non-finite values"))?;
        self.solutions.push(TerrainSolution { terrain });
        Ok(())
    }

    pub fn cameras(&self) -> &[ExternalParams] {
        &self.cameras
    }

    pub fn internal(&self) -> &InternalParams {
        &self.internal
    }

    pub fn solutions(&self) -> &[TerrainSolution] {
        &self.solutions
    }

    pub(crate) fn check_against(&self, data_set: &DataSet) -> Result<()> {
        if self.cameras.len() != data_set.len() {
            return Err(GeosolveError::schema(format!(
                "model_terrain has {} cameras for {} images",
                self.cameras.len(),
                data_set.len()
            )));
        }
        Ok(())
    }

    fn check_prerequisites(&self, ctx: &SolveContext<'_>) -> Result<&TerrainSolution> {
        let parent_index = self
            .parent_index
            .ok_or_else(|| GeosolveError::validation("terrain model has no parent"))?;
        match ctx.parent {
            None => {
                return Err(GeosolveError::validation(format!(
                    "parent model {parent_index} is missing"
                )))
            }
            Some(parent) if parent.solution_count() == 0 => {
                return Err(GeosolveError::validation(format!(
                    "parent model {parent_index} has no solution"
                )))
            }
            Some(_) => {}
        }
        if !ctx.features.is_computed() {
            return Err(GeosolveError::validation("features have not been computed"));
        }
        let current = self
            .solutions
            .last()
            .ok_or_else(|| GeosolveError::validation("terrain model has no seed points"))?;
        let expected = ctx.features.track_count();
        if current.terrain.len() != expected {
            return Err(GeosolveError::validation(format!(
                "{} terrain points for {} tracked correspondences",
                current.terrain.len(),
                expected
            )));
        }
        if self.cameras.len() != ctx.features.data_set().len() {
            return Err(GeosolveError::validation(format!(
                "{} frozen cameras for {} images",
                self.cameras.len(),
                ctx.features.data_set().len()
            )));
        }
        Ok(current)
    }
}

impl Stage for ModelTerrain {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn parent_index(&self) -> Option<usize> {
        self.parent_index
    }

    fn bootstrapable(&self) -> bool {
        false
    }

    fn pixel_size(&self) -> Real {
        self.pixel_size
    }

    fn solution_count(&self) -> usize {
        self.solutions.len()
    }

    fn final_internal(&self) -> Result<InternalParams> {
        Err(GeosolveError::NotApplicable {
            accessor: "final_internal",
            model: Self::TYPE_TAG,
        })
    }

    fn final_external(&self) -> Result<Vec<ExternalParams>> {
        Err(GeosolveError::NotApplicable {
            accessor: "final_external",
            model: Self::TYPE_TAG,
        })
    }

    fn final_terrain(&self) -> Result<Vec<TerrainPoint>> {
        self.solutions
            .last()
            .map(|s| s.terrain.clone())
            .ok_or(GeosolveError::NotSolved)
    }

    fn solve(&mut self, ctx: &SolveContext<'_>) -> Result<SolveReport> {
        let current = self.check_prerequisites(ctx)?;
        let data_set = ctx.features.data_set();

        let mut observations = Vec::with_capacity(2 * current.terrain.len());
        for (point, ((a, b), c)) in ctx.features.tracks().enumerate() {
            observations.push(TerrainObservation {
                camera: a,
                point,
                sensor: data_set.sensor_from_pixel(&c.a, self.pixel_size),
            });
            observations.push(TerrainObservation {
                camera: b,
                point,
                sensor: data_set.sensor_from_pixel(&c.b, self.pixel_size),
            });
        }
        let residual_blocks = observations.len();
        let dataset = TerrainDataset::new(current.terrain.len(), observations)
            .map_err(|err| GeosolveError::validation(format!("{err:#}")))?;

        let init = TerrainInit {
            internal: self.internal,
            cameras: self.cameras.clone(),
            points: current.terrain.clone(),
        };
        let opts = TerrainSolveOptions {
            robust_loss: ctx.options.robust_loss,
            weight: 1.0 / (self.pixel_size * self.pixel_size),
        };

        info!("model_terrain: solving {} ground points", init.points.len());
        let result = optimize_terrain(ctx.backend, &dataset, &init, &opts, &ctx.options.backend)
            .map_err(|err| GeosolveError::numerical(format!("{err:#}")))?;
        ensure_converged("model_terrain", result.converged, ctx.options.backend.max_iters)?;
        ensure_finite("refined terrain", result.points.iter().flatten())?;

        let report = SolveReport {
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            residuals: 2 * residual_blocks,
        };
        info!("model_terrain: {}", report.summary());
        self.solutions.push(TerrainSolution {
            terrain: result.points,
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model0;

    fn parent() -> Model {
        Model0::new([0.05, 0.01, 0.0], 8.5e-6, vec![[0.0, 0.0, 100.0, 0.0, 0.0, 0.0]; 2]).into()
    }

    #[test]
    fn from_parent_freezes_cameras_and_intrinsics() {
        let terrain = ModelTerrain::from_parent(0, &parent()).unwrap();
        assert_eq!(terrain.parent_index, Some(0));
        assert_eq!(terrain.internal(), &[0.05, 0.01, 0.0]);
        assert_eq!(terrain.cameras().len(), 2);
        assert_eq!(terrain.pixel_size(), 8.5e-6);
        assert!(matches!(terrain.final_terrain(), Err(GeosolveError::NotSolved)));
    }

    #[test]
    fn camera_accessors_are_not_applicable() {
        let terrain = ModelTerrain::from_parent(0, &parent()).unwrap();
        assert!(matches!(
            terrain.final_internal(),
            Err(GeosolveError::NotApplicable { accessor: "final_internal", .. })
        ));
        assert!(matches!(
            terrain.final_external(),
            Err(GeosolveError::NotApplicable { .. })
        ));
    }

    #[test]
    fn terrain_parent_is_rejected() {
        let terrain: Model = ModelTerrain::from_parent(0, &parent()).unwrap().into();
        // an unseeded terrain stage has no solution to freeze
        assert!(matches!(
            ModelTerrain::from_parent(1, &terrain),
            Err(GeosolveError::Validation(_))
        ));
    }
}
