//! Non-linear least-squares machinery for the geosolve model chain.
//!
//! Problems are described in a backend-independent IR ([`ir::ProblemIR`]):
//! named parameter blocks plus reprojection residual blocks. An
//! [`backend::OptimBackend`] compiles the IR into a solver-native problem and
//! returns refined parameters with cost diagnostics. The bundled backend runs
//! tiny-solver's Levenberg-Marquardt optimizer.

pub mod backend;
pub mod factors;
pub mod ir;
pub mod problems;

pub use crate::backend::{
    BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend, TinySolverBackend,
};
pub use crate::ir::RobustLoss;
