use serde::{Deserialize, Serialize};

use crate::filters::rate_integral::RateIntegral;
use crate::types::{gravity, InertialSample, Quaternion, QuaternionExt, Vector3, Vector3Ext};

/// Rotation that carries the world-frame accelerometer direction onto gravity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TiltCorrection {
    /// Radians, in [0, pi]
    pub angle: f64,
    /// Unit axis, or zero when the accelerometer already points along gravity
    pub axis: Vector3,
}

impl TiltCorrection {
    pub fn to_quaternion(&self) -> Quaternion {
        Quaternion::from_angle_axis(self.angle, &self.axis)
    }

    /// The same correction scaled down to `fraction` of its angle.
    pub fn partial(&self, fraction: f64) -> Quaternion {
        Quaternion::from_angle_axis(fraction * self.angle, &self.axis)
    }
}

/// Rotate `accel` into the world frame with `estimate` and measure how far it is from gravity.
pub fn tilt_correction(estimate: &Quaternion, accel: &Vector3) -> TiltCorrection {
    let g = gravity();
    let v = estimate.rotate_vector(accel).normalize_or_keep();
    let axis = v.cross(&g).normalize_or_keep();
    let angle = v.dot(&g).clamp(-1.0, 1.0).acos();
    TiltCorrection { angle, axis }
}

/// The three estimates produced by one fusion step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionOutput {
    pub gyro_only: Quaternion,
    pub accel_tilt: Quaternion,
    pub fused: Quaternion,
}

/// Quaternion complementary filter
///
/// Each step integrates the gyro onto the previous fused estimate, measures the tilt error
/// against gravity from the accelerometer, and applies `(1 - alpha)` of that correction:
///
/// `q_c(t) = q((1 - alpha) * phi, n) * q_gyro(t)`
///
/// `dt` must be the real interval since the previous step; integration error compounds
/// otherwise.
#[derive(Clone, Debug)]
pub struct AttitudeFusion {
    alpha: f64,
    rate: RateIntegral,
    fused: Quaternion,
    updates: u64,
}

impl AttitudeFusion {
    pub fn new(alpha: f64) -> Self {
        AttitudeFusion {
            alpha,
            rate: RateIntegral::new(),
            fused: Quaternion::identity(),
            updates: 0,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn fused(&self) -> Quaternion {
        self.fused
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn apply(&mut self, dt: f64, gyro: &Vector3, accel: &Vector3) -> FusionOutput {
        let prior = self.fused;
        let gyro_only = self.rate.apply(dt, gyro, Some(&prior));

        let tilt = tilt_correction(&gyro_only, accel);
        let blend = tilt.partial(1.0 - self.alpha);

        self.fused = (blend * gyro_only).normalize_or_keep();
        self.updates += 1;

        FusionOutput {
            gyro_only,
            accel_tilt: tilt.to_quaternion(),
            fused: self.fused,
        }
    }

    /// Run one step on `sample.gyro_raw` and `accel`, writing the estimates back into `sample`.
    pub fn update_sample(&mut self, dt: f64, accel: &Vector3, sample: &mut InertialSample) {
        let out = self.apply(dt, &sample.gyro_raw, accel);
        sample.gyro_only_estimate = out.gyro_only;
        sample.accel_tilt_estimate = out.accel_tilt;
        sample.fused_estimate = out.fused;
    }
}

impl Default for AttitudeFusion {
    fn default() -> Self {
        Self::new(0.9)
    }
}

/// Single-axis complementary filter
///
/// `x(t+1) = alpha * (x(t) + omega * dt) + (1 - alpha) * atan2(a_x, a_y)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalarComplementaryFilter {
    alpha: f64,
    x: f64,
}

impl ScalarComplementaryFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, x: 0.0 }
    }

    pub fn get(&self) -> f64 {
        self.x
    }

    pub fn apply(&mut self, dt: f64, omega: f64, a_x: f64, a_y: f64) -> f64 {
        self.x = self.alpha * (self.x + omega * dt) + (1.0 - self.alpha) * a_x.atan2(a_y);
        self.x
    }
}
