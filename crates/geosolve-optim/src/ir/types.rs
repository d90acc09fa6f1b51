use anyhow::{ensure, Result};
use geosolve_core::{EXTERNAL_DOF, INTERNAL_DOF, POINT_DOF};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier for a parameter block in the IR.
///
/// This is stable within a `ProblemIR` instance and is used by residual blocks
/// to reference their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Fixed parameter mask for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    /// Creates a mask with no fixed indices.
    pub fn all_free() -> Self {
        Self {
            fixed_indices: HashSet::new(),
        }
    }

    /// Creates a mask with all indices fixed.
    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    /// Creates a mask from an explicit list of indices.
    pub fn fix_indices(indices: &[usize]) -> Self {
        Self {
            fixed_indices: indices.iter().copied().collect(),
        }
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_indices.contains(&idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }
}

/// Robust loss applied to a residual block.
///
/// Each residual block has its own loss; per-observation robustification is
/// achieved by using one residual block per observation and camera.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
    Arctan {
        scale: f64,
    },
}

/// Backend-agnostic factor kinds.
///
/// Each factor kind implies its parameter layout and residual dimension. All
/// reprojection residuals are `sqrt(w) · (predicted − observed)` in sensor
/// units.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Reprojection of a free ground point through a free camera.
    ///
    /// Parameters: [internal (3), camera (6), point (3)]
    ReprojFreeCamera { observed: [f64; 2], w: f64 },
    /// Reprojection of a free ground point through a frozen camera.
    ///
    /// Parameters: [point (3)]. Camera intrinsics and pose are factor data.
    ReprojFrozenCamera {
        internal: [f64; INTERNAL_DOF],
        camera: [f64; EXTERNAL_DOF],
        observed: [f64; 2],
        w: f64,
    },
}

impl FactorKind {
    /// Residual dimension implied by the factor.
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::ReprojFreeCamera { .. } => 2,
            FactorKind::ReprojFrozenCamera { .. } => 2,
        }
    }

    /// Expected dimensions of the parameter blocks, in order.
    pub fn param_dims(&self) -> &'static [usize] {
        match self {
            FactorKind::ReprojFreeCamera { .. } => &[INTERNAL_DOF, EXTERNAL_DOF, POINT_DOF],
            FactorKind::ReprojFrozenCamera { .. } => &[POINT_DOF],
        }
    }
}

/// Parameter block definition in the IR.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub fixed: FixedMask,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

impl ResidualBlock {
    pub fn new(params: Vec<ParamId>, factor: FactorKind, loss: RobustLoss) -> Self {
        Self {
            residual_dim: factor.residual_dim(),
            params,
            loss,
            factor,
        }
    }
}

/// Backend-agnostic optimization problem representation.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        fixed: FixedMask,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            fixed,
        });
        id
    }

    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Number of parameter entries left free by the fixed masks.
    pub fn free_dim(&self) -> usize {
        self.params.iter().map(|p| p.dim - p.fixed.iter().count()).sum()
    }

    /// Total residual dimension.
    pub fn residual_dim(&self) -> usize {
        self.residuals.iter().map(|r| r.residual_dim).sum()
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                names.insert(param.name.as_str()),
                "duplicate param name {}",
                param.name
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            let dims = residual.factor.param_dims();
            ensure!(
                residual.params.len() == dims.len(),
                "residual {} has {} params, factor {:?} expects {}",
                r_idx,
                residual.params.len(),
                residual.factor,
                dims.len()
            );
            for (param, &dim) in residual.params.iter().zip(dims) {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
                let block = &self.params[param.0];
                ensure!(
                    block.dim == dim,
                    "residual {} expects {}D block, {} is {}D",
                    r_idx,
                    dim,
                    block.name,
                    block.dim
                );
            }
        }

        Ok(())
    }
}
