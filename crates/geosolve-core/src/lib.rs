//! Core value types and the feature-correspondence graph for `geosolve`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the survey camera model (angle-axis pose, shared focal length and
//!   two-term radial distortion) as a generic pinhole projection,
//! - [`DataSet`] and [`FeaturesGraph`], the inputs every model stage shares,
//! - the [`FeatureMatcher`] collaborator trait and a match-file implementation,
//! - the crate-wide error taxonomy ([`GeosolveError`]).
//!
//! Camera pipeline:
//! `sensor = distortion ∘ pinhole(R(ω)·(P − C))`

/// Survey camera parameters and pinhole projection.
pub mod camera;
/// Image collection description.
pub mod dataset;
/// Error taxonomy shared by every crate in the workspace.
pub mod error;
/// Correspondence graph over image pairs.
pub mod features;
/// Linear algebra type aliases and rotation helpers.
pub mod math;
/// Feature matcher backed by precomputed match files.
pub mod matchfile;

pub use camera::*;
pub use dataset::DataSet;
pub use error::{GeosolveError, Result};
pub use features::{Correspondence, FeatureMatcher, FeaturesGraph, FeaturesRecord, MatchRequest};
pub use math::*;
pub use matchfile::MatchFileMatcher;
