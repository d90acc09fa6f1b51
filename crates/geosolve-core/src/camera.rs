use nalgebra::{RealField, Vector2, Vector3};

use crate::math::{angle_axis_rotate_point, Real, Vec2, Vec3};

/// Number of shared intrinsic parameters: `[f, k1, k2]`.
pub const INTERNAL_DOF: usize = 3;
/// Number of extrinsic parameters per camera: `[X, Y, Z, ωx, ωy, ωz]`.
pub const EXTERNAL_DOF: usize = 6;
/// Number of coordinates per terrain point: `[X, Y, Z]`.
pub const POINT_DOF: usize = 3;

/// Shared intrinsics: focal length and two radial distortion coefficients,
/// all in sensor units (metres).
pub type InternalParams = [Real; INTERNAL_DOF];
/// Camera pose: centre in world coordinates followed by an angle-axis rotation
/// taking world directions into the camera frame.
pub type ExternalParams = [Real; EXTERNAL_DOF];
/// Ground point in world coordinates.
pub type TerrainPoint = [Real; POINT_DOF];

/// Depth magnitude below which a point is treated as lying on the image plane.
pub const PROJECTION_EPS: f64 = 1.0e-12;

/// Apply the two-term radial distortion model to ideal sensor coordinates.
pub fn distort_radial<T: RealField>(x: T, y: T, k1: T, k2: T) -> Vector2<T> {
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let scale = T::one() + k1 * r2.clone() + k2 * r2.clone() * r2;
    Vector2::new(x * scale.clone(), y * scale)
}

/// Project a world point through the survey camera model.
///
/// `internal` is `[f, k1, k2]`, `external` is `[X, Y, Z, ωx, ωy, ωz]` and
/// `point` is `[X, Y, Z]`. The camera looks down its own −Z axis, so a point
/// below a nadir camera lands at positive sensor coordinates in the direction
/// of its horizontal offset. Returns the predicted sensor coordinate.
pub fn pinhole_projection<T: RealField>(internal: &[T], external: &[T], point: &[T]) -> Vector2<T> {
    debug_assert!(internal.len() >= INTERNAL_DOF, "internal must have 3 params");
    debug_assert!(external.len() >= EXTERNAL_DOF, "external must have 6 params");
    debug_assert!(point.len() >= POINT_DOF, "point must have 3 coordinates");

    let centre = Vector3::new(external[0].clone(), external[1].clone(), external[2].clone());
    let aa = Vector3::new(external[3].clone(), external[4].clone(), external[5].clone());
    let pw = Vector3::new(point[0].clone(), point[1].clone(), point[2].clone());
    let pc = angle_axis_rotate_point(&aa, &(pw - centre));

    let eps = nalgebra::convert::<f64, T>(PROJECTION_EPS);
    let z = if pc.z.clone().abs() > eps.clone() {
        pc.z.clone()
    } else {
        -eps
    };

    let f = internal[0].clone();
    let x = -f.clone() * pc.x.clone() / z.clone();
    let y = -f * pc.y.clone() / z;
    distort_radial(x, y, internal[1].clone(), internal[2].clone())
}

/// `f64` convenience wrapper around [`pinhole_projection`].
pub fn project_point(
    internal: &InternalParams,
    external: &ExternalParams,
    point: &TerrainPoint,
) -> Vec2 {
    pinhole_projection(internal, external, point)
}

/// Remove radial distortion from a sensor coordinate by fixed-point iteration.
pub fn undistort_radial(internal: &InternalParams, sensor: &Vec2, iters: usize) -> Vec2 {
    let [_, k1, k2] = *internal;
    let mut ideal = *sensor;
    for _ in 0..iters {
        let r2 = ideal.norm_squared();
        let scale = 1.0 + k1 * r2 + k2 * r2 * r2;
        if scale.abs() < f64::EPSILON {
            break;
        }
        ideal = sensor / scale;
    }
    ideal
}

/// Back-project a sensor coordinate into a world ray `(origin, unit direction)`.
pub fn back_project(
    internal: &InternalParams,
    external: &ExternalParams,
    sensor: &Vec2,
) -> (Vec3, Vec3) {
    let ideal = undistort_radial(internal, sensor, 5);
    let origin = Vec3::new(external[0], external[1], external[2]);
    let aa = Vec3::new(external[3], external[4], external[5]);
    let dir_cam = Vec3::new(ideal.x, ideal.y, -internal[0]);
    let dir_world = angle_axis_rotate_point(&(-aa), &dir_cam);
    (origin, dir_world.normalize())
}
