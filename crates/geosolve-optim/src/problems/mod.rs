//! Problem builders for the two model stages.
//!
//! - [`pose_intrinsics`] refines camera poses, shared intrinsics and one free
//!   ground point per correspondence.
//! - [`terrain`] refines ground points through cameras held constant.

pub mod pose_intrinsics;
pub mod terrain;

use geosolve_core::Vec3;
use log::warn;

/// Intersect a ray with the horizontal plane `Z = height`.
///
/// Rays that are parallel to the plane or point away from it fall back to the
/// point at the origin's height above the plane along the ray.
pub fn intersect_datum(origin: &Vec3, dir: &Vec3, height: f64) -> Vec3 {
    if dir.z.abs() > 1e-9 {
        let t = (height - origin.z) / dir.z;
        if t > 0.0 {
            return origin + dir * t;
        }
    }
    warn!("ray from {origin:?} does not reach the datum Z = {height}, seeding along the ray");
    origin + dir * (origin.z - height).abs().max(1.0)
}
