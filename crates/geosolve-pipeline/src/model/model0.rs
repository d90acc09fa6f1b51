use geosolve_core::{
    DataSet, ExternalParams, FeaturesGraph, GeosolveError, InternalParams, Real, Result,
    TerrainPoint,
};
use geosolve_optim::problems::pose_intrinsics::{
    optimize_pose_intrinsics, PairObservation, PoseIntrinsicsDataset, PoseIntrinsicsInit,
    PoseIntrinsicsSolveOptions,
};
use log::info;
use serde::{Deserialize, Serialize};

use super::{ensure_converged, ensure_finite, SolveContext, SolveReport, Stage};

/// One entry of the Model0 solution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model0Solution {
    /// Pose of every image, index-aligned with the data set.
    pub cameras: Vec<ExternalParams>,
    /// Focal length and radial distortion shared by all images.
    pub internal: InternalParams,
}

/// Joint camera pose and shared intrinsics stage.
///
/// `solutions[0]` is the initial guess; each successful `solve()` appends the
/// refined estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model0 {
    #[serde(default)]
    pub parent_index: Option<usize>,
    /// Physical size of one pixel on the sensor; never optimized.
    pub pixel_size: Real,
    solutions: Vec<Model0Solution>,
}

impl Model0 {
    pub const TYPE_TAG: &'static str = "model0";

    pub fn new(internal: InternalParams, pixel_size: Real, cameras: Vec<ExternalParams>) -> Self {
        Self {
            parent_index: None,
            pixel_size,
            solutions: vec![Model0Solution { cameras, internal }],
        }
    }

    pub fn solutions(&self) -> &[Model0Solution] {
        &self.solutions
    }

    fn last(&self) -> Result<&Model0Solution> {
        self.solutions.last().ok_or(GeosolveError::NotSolved)
    }

    pub(crate) fn check_against(&self, data_set: &DataSet) -> Result<()> {
        for (idx, solution) in self.solutions.iter().enumerate() {
            if solution.cameras.len() != data_set.len() {
                return Err(GeosolveError::schema(format!(
                    "model0 solution {idx} has {} cameras for {} images",
                    solution.cameras.len(),
                    data_set.len()
                )));
            }
        }
        Ok(())
    }

    fn check_prerequisites(&self, features: &FeaturesGraph) -> Result<&Model0Solution> {
        if !features.is_computed() {
            return Err(GeosolveError::validation("features have not been computed"));
        }
        if features.edges().is_empty() {
            return Err(GeosolveError::validation("feature graph has no edges"));
        }
        let current = self
            .solutions
            .last()
            .ok_or_else(|| GeosolveError::validation("model0 has no initial solution"))?;
        let images = features.data_set().len();
        if current.cameras.len() != images {
            return Err(GeosolveError::validation(format!(
                "{} cameras for {} images",
                current.cameras.len(),
                images
            )));
        }
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(GeosolveError::validation(format!(
                "pixel_size must be positive, got {}",
                self.pixel_size
            )));
        }
        for (idx, &(a, b)) in features.edges().iter().enumerate() {
            if features.observations(idx).is_empty() {
                return Err(GeosolveError::validation(format!(
                    "edge ({a}, {b}) has no observations"
                )));
            }
        }
        Ok(current)
    }
}

impl Stage for Model0 {
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
        Ok(self.last()?.internal)
    }

    fn final_external(&self) -> Result<Vec<ExternalParams>> {
        Ok(self.last()?.cameras.clone())
    }

    fn final_terrain(&self) -> Result<Vec<TerrainPoint>> {
        Err(GeosolveError::NotApplicable {
            accessor: "final_terrain",
            model: Self::TYPE_TAG,
        })
    }

    fn solve(&mut self, ctx: &SolveContext<'_>) -> Result<SolveReport> {
        let current = self.check_prerequisites(ctx.features)?;
        let data_set = ctx.features.data_set();

        let observations = ctx
            .features
            .tracks()
            .map(|((a, b), c)| PairObservation {
                camera_a: a,
                camera_b: b,
                sensor_a: data_set.sensor_from_pixel(&c.a, self.pixel_size),
                sensor_b: data_set.sensor_from_pixel(&c.b, self.pixel_size),
            })
            .collect::<Vec<_>>();
        let track_count = observations.len();
        let dataset = PoseIntrinsicsDataset::new(data_set.len(), observations)
            .map_err(|err| GeosolveError::validation(format!("{err:#}")))?;

        let init = PoseIntrinsicsInit {
            internal: current.internal,
            cameras: current.cameras.clone(),
        };
        let opts = PoseIntrinsicsSolveOptions {
            robust_loss: ctx.options.robust_loss,
            fix_internal: [ctx.options.fix_internal; 3],
            fix_cameras: if ctx.options.fix_first_camera {
                vec![0]
            } else {
                Vec::new()
            },
            fix_scale: ctx.options.fix_scale,
            datum_height: ctx.options.datum_height,
            weight: 1.0 / (self.pixel_size * self.pixel_size),
        };

        info!(
            "model0: solving {} cameras over {} correspondences",
            init.cameras.len(),
            track_count
        );
        let result =
            optimize_pose_intrinsics(ctx.backend, &dataset, &init, &opts, &ctx.options.backend)
                .map_err(|err| GeosolveError::numerical(format!("{err:#}")))?;

        ensure_converged("model0", result.converged, ctx.options.backend.max_iters)?;
        ensure_finite("refined intrinsics", &result.internal)?;
        ensure_finite("refined cameras", result.cameras.iter().flatten())?;

        let report = SolveReport {
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            residuals: 4 * track_count,
        };
        info!("model0: {}", report.summary());
        self.solutions.push(Model0Solution {
            cameras: result.cameras,
            internal: result.internal,
        });
        Ok(report)
    }
}
