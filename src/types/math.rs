//! Vector and quaternion primitives for attitude math
//!
//! Plain aliases over nalgebra, plus the few operations whose edge cases matter on the
//! sampling hot path: normalising anything shorter than `EPSILON` leaves it untouched,
//! and angle-axis reconstruction clamps the scalar part before `acos`.

use nalgebra::{Quaternion as NaQuaternion, Vector3 as NaVector3};

pub const EPSILON: f64 = 1e-8;
pub const DEGREE_TO_RAD: f64 = std::f64::consts::PI / 180.0;
pub const RAD_TO_DEGREE: f64 = 180.0 / std::f64::consts::PI;

// ===== Value types =====
pub type Vector3 = NaVector3<f64>;
/// Scalar + 3-vector. Hamilton product via `*`; `a * b` applies `b` first when rotating.
pub type Quaternion = NaQuaternion<f64>;

/// Reference gravity direction in the world frame.
pub fn gravity() -> Vector3 {
    Vector3::new(0.0, 0.0, 1.0)
}

pub trait Vector3Ext {
    /// Unit vector in the same direction, or the vector itself when its norm is <= `EPSILON`.
    fn normalize_or_keep(&self) -> Vector3;

    /// Treats the components as (roll, pitch, yaw) radians.
    fn display_degrees(&self, label: &str) -> String;
}

impl Vector3Ext for Vector3 {
    fn normalize_or_keep(&self) -> Vector3 {
        let len = self.norm();
        if len <= EPSILON {
            return *self;
        }
        *self / len
    }

    fn display_degrees(&self, label: &str) -> String {
        format!(
            "{}: roll:{:.3}, pitch:{:.3}, yaw:{:.3}",
            label,
            self.x * RAD_TO_DEGREE,
            self.y * RAD_TO_DEGREE,
            self.z * RAD_TO_DEGREE
        )
    }
}

pub trait QuaternionExt: Sized {
    /// Rotation of `angle` radians about `axis`. The axis is normalised first; a degenerate
    /// axis yields the identity rotation.
    fn from_angle_axis(angle: f64, axis: &Vector3) -> Self;

    /// Inverse of `from_angle_axis` for unit quaternions.
    fn to_angle_axis(&self) -> (f64, Vector3);

    /// Unit quaternion, or `self` unchanged when the norm is <= `EPSILON`.
    fn normalize_or_keep(&self) -> Self;

    /// `q⁻¹`, falling back to the conjugate for the zero quaternion.
    fn inverse_or_conjugate(&self) -> Self;

    /// Vector part of `q · v · q⁻¹`.
    fn rotate_vector(&self, v: &Vector3) -> Vector3;

    /// (roll, pitch, yaw) in radians.
    fn to_euler(&self) -> Vector3;

    /// Builds a unit quaternion from (roll, pitch, yaw) radians.
    fn from_euler(euler: &Vector3) -> Self;
}

impl QuaternionExt for Quaternion {
    fn from_angle_axis(angle: f64, axis: &Vector3) -> Self {
        let n = axis.normalize_or_keep();
        if n.norm() <= EPSILON {
            return Quaternion::identity();
        }
        let half = angle / 2.0;
        let s = half.sin();
        Quaternion::new(half.cos(), n.x * s, n.y * s, n.z * s)
    }

    fn to_angle_axis(&self) -> (f64, Vector3) {
        let half_theta = self.w.clamp(-1.0, 1.0).acos();
        let sin_half_theta = half_theta.sin();
        let axis = if sin_half_theta == 0.0 {
            Vector3::new(1.0, 0.0, 0.0)
        } else {
            Vector3::new(
                self.i / sin_half_theta,
                self.j / sin_half_theta,
                self.k / sin_half_theta,
            )
        };
        (2.0 * half_theta, axis)
    }

    fn normalize_or_keep(&self) -> Self {
        let len = self.norm();
        if len <= EPSILON || len == 1.0 {
            return *self;
        }
        *self / len
    }

    fn inverse_or_conjugate(&self) -> Self {
        self.try_inverse().unwrap_or_else(|| self.conjugate())
    }

    fn rotate_vector(&self, v: &Vector3) -> Vector3 {
        let p = Quaternion::from_imag(*v);
        (*self * p * self.inverse_or_conjugate()).imag()
    }

    fn to_euler(&self) -> Vector3 {
        let (w, x, y, z) = (self.w, self.i, self.j, self.k);
        let roll = (2.0 * (y * z + w * x)).atan2(1.0 - 2.0 * (x * x + y * y));
        // Deliberately clamped rather than the bare asin: at ±90° pitch the argument can
        // drift past ±1 and would yield NaN. See test_euler_at_gimbal_lock_is_finite.
        let pitch = (2.0 * (w * y - x * z)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (x * y + w * z)).atan2(1.0 - 2.0 * (y * y + z * z));
        Vector3::new(roll, pitch, yaw)
    }

    fn from_euler(euler: &Vector3) -> Self {
        let (sx, cx) = (euler.x / 2.0).sin_cos();
        let (sy, cy) = (euler.y / 2.0).sin_cos();
        let (sz, cz) = (euler.z / 2.0).sin_cos();

        Quaternion::new(
            cx * cy * cz + sx * sy * sz,
            sx * cy * cz - cx * sy * sz,
            cx * sy * cz + sx * cy * sz,
            cx * cy * sz - sx * sy * cz,
        )
        .normalize_or_keep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_vector_normalize_skips_tiny() {
        let tiny = Vector3::new(1e-10, 0.0, 0.0);
        assert_eq!(tiny.normalize_or_keep(), tiny);

        let v = Vector3::new(3.0, 4.0, 0.0).normalize_or_keep();
        assert_abs_diff_eq!(v.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.x, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_and_dot_are_right_handed() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(&y), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(x.dot(&y), 0.0);
        assert_eq!(x.component_mul(&Vector3::new(2.0, 3.0, 4.0)), Vector3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_quaternion_normalize_is_unit() {
        let samples = [
            Quaternion::new(1.0, 2.0, 3.0, 4.0),
            Quaternion::new(-0.5, 0.1, 0.0, 7.0),
            Quaternion::new(0.0, 0.0, 0.0, 1e-3),
            Quaternion::new(1e6, -1e6, 3.0, 0.0),
        ];
        for q in samples {
            assert_abs_diff_eq!(q.normalize_or_keep().norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_quaternion_normalize_leaves_degenerate_unchanged() {
        let q = Quaternion::new(1e-9, 0.0, 0.0, 0.0);
        assert_eq!(q.normalize_or_keep(), q);
        let zero = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(zero.normalize_or_keep(), zero);
    }

    #[test]
    fn test_rotate_vector_quarter_turn_about_z() {
        let q = Quaternion::from_angle_axis(FRAC_PI_2, &Vector3::new(0.0, 0.0, 1.0));
        let rotated = q.rotate_vector(&Vector3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(rotated, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_composition_order() {
        // (a * b) rotates by b first, then a
        let a = Quaternion::from_angle_axis(FRAC_PI_2, &Vector3::new(0.0, 0.0, 1.0));
        let b = Quaternion::from_angle_axis(FRAC_PI_2, &Vector3::new(1.0, 0.0, 0.0));
        let v = Vector3::new(0.0, 1.0, 0.0);
        let composed = (a * b).rotate_vector(&v);
        let stepwise = a.rotate_vector(&b.rotate_vector(&v));
        assert_abs_diff_eq!(composed, stepwise, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_axis_round_trip() {
        let axis = Vector3::new(1.0, 2.0, -2.0).normalize_or_keep();
        let q = Quaternion::from_angle_axis(0.7, &axis);
        let (angle, back) = q.to_angle_axis();
        assert_abs_diff_eq!(angle, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(back, axis, epsilon = 1e-12);
    }

    #[test]
    fn test_to_angle_axis_clamps_scalar() {
        let q = Quaternion::new(1.0 + 1e-12, 0.0, 0.0, 0.0);
        let (angle, axis) = q.to_angle_axis();
        assert_eq!(angle, 0.0);
        assert_eq!(axis, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_zero_axis_is_identity() {
        let q = Quaternion::from_angle_axis(1.0, &Vector3::zeros());
        assert_eq!(q, Quaternion::identity());
    }

    #[test]
    fn test_euler_round_trip() {
        let euler = Vector3::new(0.1, -0.4, 2.5);
        let q = Quaternion::from_euler(&euler);
        assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.to_euler(), euler, epsilon = 1e-12);
    }

    #[test]
    fn test_euler_at_gimbal_lock_is_finite() {
        let q = Quaternion::from_euler(&Vector3::new(0.0, FRAC_PI_2, 0.0));
        let euler = q.to_euler();
        assert!(euler.iter().all(|c| c.is_finite()));
        assert_abs_diff_eq!(euler.y, FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn test_euler_pitch_argument_past_unity_is_clamped() {
        // Slightly over-unit quaternions at ±90° pitch put the asin argument past ±1
        let c = FRAC_PI_4.cos() * (1.0 + 1e-7);
        let up = Quaternion::new(c, 0.0, c, 0.0);
        assert!(2.0 * up.w * up.j > 1.0);
        assert_abs_diff_eq!(up.to_euler().y, FRAC_PI_2, epsilon = 1e-12);

        let down = Quaternion::new(c, 0.0, -c, 0.0);
        assert_abs_diff_eq!(down.to_euler().y, -FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_undoes_rotation() {
        let q = Quaternion::from_angle_axis(PI / 3.0, &Vector3::new(0.0, 1.0, 1.0));
        let v = Vector3::new(0.3, -1.0, 2.0);
        let back = q.inverse_or_conjugate().rotate_vector(&q.rotate_vector(&v));
        assert_abs_diff_eq!(back, v, epsilon = 1e-12);
    }

    #[test]
    fn test_display_degrees() {
        let s = Vector3::new(PI, 0.0, -FRAC_PI_2).display_degrees("fused");
        assert_eq!(s, "fused: roll:180.000, pitch:0.000, yaw:-90.000");
    }
}
