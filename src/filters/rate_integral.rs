use crate::types::{Quaternion, QuaternionExt, Vector3};

/// Gyro rate integration
///
/// `q(t+1) = q(t) * q(dt * |w|, w / |w|)`, where `q` rotates sensor-frame vectors into the
/// world frame. A zero angular velocity contributes the identity rotation.
#[derive(Clone, Debug)]
pub struct RateIntegral {
    q: Quaternion,
}

impl RateIntegral {
    pub fn new() -> Self {
        RateIntegral {
            q: Quaternion::identity(),
        }
    }

    pub fn get(&self) -> Quaternion {
        self.q
    }

    /// Integrate one step of angular velocity `omega` (rad/s) over `dt` seconds. When `prior`
    /// is given the step is composed onto it instead of the internally tracked estimate.
    pub fn apply(&mut self, dt: f64, omega: &Vector3, prior: Option<&Quaternion>) -> Quaternion {
        let q_delta = Quaternion::from_angle_axis(dt * omega.norm(), omega);
        let base = prior.copied().unwrap_or(self.q);
        self.q = base * q_delta;
        self.q
    }
}

impl Default for RateIntegral {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_rate_is_identity() {
        let mut rate = RateIntegral::new();
        let q = rate.apply(0.01, &Vector3::zeros(), None);
        assert_eq!(q, Quaternion::identity());
    }

    #[test]
    fn test_constant_yaw_rate_accumulates() {
        let mut rate = RateIntegral::new();
        let omega = Vector3::new(0.0, 0.0, 0.5);
        for _ in 0..200 {
            rate.apply(0.01, &omega, None);
        }
        let euler = rate.get().to_euler();
        assert_abs_diff_eq!(euler.z, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(euler.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_prior_overrides_internal_state() {
        let mut rate = RateIntegral::new();
        rate.apply(1.0, &Vector3::new(1.0, 0.0, 0.0), None);

        let prior = Quaternion::from_angle_axis(0.25, &Vector3::new(0.0, 1.0, 0.0));
        let q = rate.apply(0.0, &Vector3::zeros(), Some(&prior));
        assert_abs_diff_eq!(q, prior, epsilon = 1e-12);
    }
}
