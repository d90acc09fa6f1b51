//! Residual factor implementations with automatic differentiation support.
//!
//! Factor functions are generic over [`nalgebra::RealField`] so the same code
//! evaluates plain `f64` residuals and dual-number Jacobians.
//!
//! ## Key Guidelines
//!
//! - Use `.clone()` liberally on `T: RealField` values (dual numbers are `Copy`-like)
//! - Convert constants with `nalgebra::convert::<f64, T>()`
//! - Include `debug_assert!` for parameter dimension checks
//!
//! # Available Factors
//!
//! - [`reprojection_model`] - survey camera reprojection with free or frozen cameras

pub mod reprojection_model;
