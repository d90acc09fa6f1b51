use geosolve_optim::{BackendSolveOptions, RobustLoss};
use serde::{Deserialize, Serialize};

/// Options shared by every model stage's `solve()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Solver iteration limits and termination thresholds.
    pub backend: BackendSolveOptions,
    /// Robust loss applied to every reprojection residual block.
    pub robust_loss: RobustLoss,
    /// Hold camera 0 at its current pose (gauge fixing).
    pub fix_first_camera: bool,
    /// Also hold one baseline coordinate of the first free camera (scale gauge).
    pub fix_scale: bool,
    /// Hold focal length and distortion at their current values.
    pub fix_internal: bool,
    /// Height of the plane used to seed Model0 ground points.
    pub datum_height: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            backend: BackendSolveOptions::default(),
            robust_loss: RobustLoss::None,
            fix_first_camera: true,
            fix_scale: true,
            fix_internal: false,
            datum_height: 0.0,
        }
    }
}
