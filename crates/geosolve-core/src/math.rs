use nalgebra::{Point2, Point3, RealField, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;

/// Squared angle below which the first-order rotation expansion is used.
const SMALL_ANGLE_SQ: f64 = 1.0e-14;

/// Rotate `p` by the angle-axis vector `aa` (Rodrigues' formula).
///
/// Near zero the first-order expansion `p + aa × p` is used so derivatives
/// with respect to `aa` stay exact when evaluated with dual numbers.
pub fn angle_axis_rotate_point<T: RealField>(aa: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = aa.norm_squared();
    if theta2 > nalgebra::convert::<f64, T>(SMALL_ANGLE_SQ) {
        let theta = theta2.sqrt();
        let cos_t = theta.clone().cos();
        let sin_t = theta.clone().sin();
        let w = aa / theta;
        let w_cross_p = w.cross(p);
        let w_dot_p = w.dot(p);
        p * cos_t.clone() + w_cross_p * sin_t + w * (w_dot_p * (T::one() - cos_t))
    } else {
        p + aa.cross(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn quarter_turn_about_z() {
        let aa = Vec3::new(0.0, 0.0, FRAC_PI_2);
        let p = angle_axis_rotate_point(&aa, &Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn zero_rotation_is_identity() {
        let p = Vec3::new(3.0, -2.0, 7.5);
        let r = angle_axis_rotate_point(&Vec3::zeros(), &p);
        assert_eq!(r, p);
    }

    #[test]
    fn opposite_axis_inverts() {
        let aa = Vec3::new(0.1, -0.2, 0.3);
        let p = Vec3::new(1.0, 2.0, 3.0);
        let back = angle_axis_rotate_point(&(-aa), &angle_axis_rotate_point(&aa, &p));
        assert!((back - p).norm() < 1e-12);
    }
}
