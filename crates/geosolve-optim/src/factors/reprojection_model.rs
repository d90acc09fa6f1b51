//! Backend-independent reprojection residual models.

use geosolve_core::pinhole_projection;
use nalgebra::{DVectorView, RealField, SVector};

fn weighted_residual<T: RealField>(
    predicted: nalgebra::Vector2<T>,
    observed: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    let sqrt_w = nalgebra::convert::<f64, T>(w.sqrt());
    let u_obs = nalgebra::convert::<f64, T>(observed[0]);
    let v_obs = nalgebra::convert::<f64, T>(observed[1]);
    let ru = (predicted.x.clone() - u_obs) * sqrt_w.clone();
    let rv = (predicted.y.clone() - v_obs) * sqrt_w;
    SVector::<T, 2>::new(ru, rv)
}

/// Residual of a ground point seen by a free camera with shared intrinsics.
///
/// The residual is `sqrt(w) · (predicted − observed)` in sensor units.
///
/// # Parameters
/// - `internal`: `[f, k1, k2]`
/// - `camera`: `[X, Y, Z, ωx, ωy, ωz]`
/// - `point`: `[X, Y, Z]`
/// - `observed`: measured sensor coordinate
/// - `w`: weight for this observation
pub(crate) fn reproj_residual_free_camera_generic<T: RealField>(
    internal: DVectorView<'_, T>,
    camera: DVectorView<'_, T>,
    point: DVectorView<'_, T>,
    observed: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    debug_assert!(internal.len() == 3, "internal must have 3 params");
    debug_assert!(camera.len() == 6, "camera must have 6 params");
    debug_assert!(point.len() == 3, "point must have 3 params");

    let predicted = pinhole_projection(internal.as_slice(), camera.as_slice(), point.as_slice());
    weighted_residual(predicted, observed, w)
}

/// Residual of a ground point seen by a camera held constant.
pub(crate) fn reproj_residual_frozen_camera_generic<T: RealField>(
    point: DVectorView<'_, T>,
    internal: &[f64; 3],
    camera: &[f64; 6],
    observed: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    debug_assert!(point.len() == 3, "point must have 3 params");

    let to_t = |v: &f64| nalgebra::convert::<f64, T>(*v);
    let internal_t: Vec<T> = internal.iter().map(to_t).collect();
    let camera_t: Vec<T> = camera.iter().map(to_t).collect();
    let predicted = pinhole_projection(&internal_t, &camera_t, point.as_slice());
    weighted_residual(predicted, observed, w)
}

/// `f64` residual of a free-camera observation, for diagnostics.
pub fn reproj_residual_free_camera(
    internal: &[f64; 3],
    camera: &[f64; 6],
    point: &[f64; 3],
    observed: [f64; 2],
    w: f64,
) -> SVector<f64, 2> {
    reproj_residual_free_camera_generic(
        DVectorView::from_slice(internal, 3),
        DVectorView::from_slice(camera, 6),
        DVectorView::from_slice(point, 3),
        observed,
        w,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosolve_core::project_point;
    use nalgebra::DVector;

    const INTERNAL: [f64; 3] = [48.3355e-3, 0.0093e-3, -0.0276e-3];
    const CAMERA: [f64; 6] = [5.0, -3.0, 269.0, 0.01, -0.02, 0.05];

    #[test]
    fn residual_is_zero_at_exact_projection() {
        let point = [12.0, 8.0, 1.5];
        let observed = project_point(&INTERNAL, &CAMERA, &point);
        let observed = [observed.x, observed.y];
        let r = reproj_residual_free_camera(&INTERNAL, &CAMERA, &point, observed, 1.0);
        assert!(r.norm() < 1e-15);
    }

    #[test]
    fn residual_sign_is_predicted_minus_observed() {
        let point = [12.0, 8.0, 1.5];
        let predicted = project_point(&INTERNAL, &CAMERA, &point);
        let observed = [predicted.x - 1e-5, predicted.y + 2e-5];
        let r = reproj_residual_free_camera(&INTERNAL, &CAMERA, &point, observed, 4.0);
        assert!((r[0] - 2e-5).abs() < 1e-12);
        assert!((r[1] + 4e-5).abs() < 1e-12);
    }

    #[test]
    fn frozen_and_free_variants_agree() {
        let point = DVector::from_vec(vec![-20.0, 4.0, 0.3]);
        let observed = [1e-3, -2e-3];
        let frozen = reproj_residual_frozen_camera_generic(
            point.as_view(),
            &INTERNAL,
            &CAMERA,
            observed,
            9.0,
        );
        let free =
            reproj_residual_free_camera(&INTERNAL, &CAMERA, &[-20.0, 4.0, 0.3], observed, 9.0);
        assert!((frozen - free).norm() < 1e-15);
    }
}
