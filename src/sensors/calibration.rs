use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::{FlightError, Result};
use crate::sensors::{InertialSensor, MAX_READ_ATTEMPTS};
use crate::types::{wire, InertialSample, Vector3};

/// Per-axis mean and unbiased variance of a stationary IMU.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationStats {
    pub samples: usize,
    #[serde(with = "wire::vec3")]
    pub gyro_mean: Vector3,
    #[serde(with = "wire::vec3")]
    pub gyro_variance: Vector3,
    #[serde(with = "wire::vec3")]
    pub accel_mean: Vector3,
    #[serde(with = "wire::vec3")]
    pub accel_variance: Vector3,
}

struct Moments {
    sum: Vector3,
    sum_sq: Vector3,
}

impl Moments {
    fn new() -> Self {
        Self {
            sum: Vector3::zeros(),
            sum_sq: Vector3::zeros(),
        }
    }

    fn add(&mut self, v: &Vector3) {
        self.sum += v;
        self.sum_sq += v.component_mul(v);
    }

    /// (mean, unbiased variance) over `n` samples
    fn finish(&self, n: usize) -> (Vector3, Vector3) {
        let n = n as f64;
        let mean = self.sum / n;
        let variance = self.sum_sq / (n - 1.0) - mean.component_mul(&mean) * (n / (n - 1.0));
        (mean, variance)
    }
}

/// Reads `samples` readings from a stationary sensor. Needs at least two samples; a sensor
/// that stays silent for `MAX_READ_ATTEMPTS` polls in a row is reported missing.
pub fn calibrate<S: InertialSensor + ?Sized>(
    sensor: &mut S,
    samples: usize,
) -> Result<CalibrationStats> {
    if samples < 2 {
        return Err(FlightError::InvalidParameters(
            "calibration needs at least 2 samples".to_string(),
        ));
    }

    let retry = Duration::from_millis(sensor.poll_interval_millis());
    let mut gyro = Moments::new();
    let mut accel = Moments::new();
    let mut reading = InertialSample::default();

    for _ in 0..samples {
        let mut attempts = 0;
        while !sensor.read_sample(0.0, &mut reading) {
            attempts += 1;
            if attempts >= MAX_READ_ATTEMPTS {
                return Err(FlightError::SensorNotFound(format!(
                    "{} stopped responding during calibration",
                    sensor.name()
                )));
            }
            thread::sleep(retry);
        }
        gyro.add(&reading.gyro_raw);
        accel.add(&reading.accel_raw);
    }

    let (gyro_mean, gyro_variance) = gyro.finish(samples);
    let (accel_mean, accel_variance) = accel.finish(samples);
    let stats = CalibrationStats {
        samples,
        gyro_mean,
        gyro_variance,
        accel_mean,
        accel_variance,
    };
    log::info!(
        "[calibration] gyro mean {:?} var {:?}, accel mean {:?} var {:?}",
        stats.gyro_mean.as_slice(),
        stats.gyro_variance.as_slice(),
        stats.accel_mean.as_slice(),
        stats.accel_variance.as_slice()
    );
    Ok(stats)
}
