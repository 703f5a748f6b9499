//! Synthetic sensors for bench runs and tests

use std::f64::consts::PI;

use crate::error::Result;
use crate::sensors::{InertialSensor, PositionSource};
use crate::types::{current_timestamp_micros, InertialSample, PositionSample, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Motion {
    Level,
    Wobble,
}

/// Fake IMU: a gentle wobble around level, or perfectly still.
pub struct MockImu {
    present: bool,
    motion: Motion,
    dropout_every: Option<u64>,
    reads: u64,
    samples: u64,
}

impl MockImu {
    pub fn new() -> Self {
        Self {
            present: true,
            motion: Motion::Wobble,
            dropout_every: None,
            reads: 0,
            samples: 0,
        }
    }

    /// Still and level: zero rates, gravity straight down the z axis.
    pub fn level() -> Self {
        Self {
            motion: Motion::Level,
            ..Self::new()
        }
    }

    /// Fails discovery.
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    /// Every `n`-th read reports no data.
    pub fn with_dropouts(mut self, n: u64) -> Self {
        self.dropout_every = Some(n.max(1));
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl Default for MockImu {
    fn default() -> Self {
        Self::new()
    }
}

impl InertialSensor for MockImu {
    fn name(&self) -> &str {
        "mock-imu"
    }

    fn discover(&mut self) -> bool {
        self.present
    }

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_interval_millis(&self) -> u64 {
        1
    }

    fn read_sample(&mut self, _delta_time: f64, sample: &mut InertialSample) -> bool {
        self.reads += 1;
        if let Some(n) = self.dropout_every {
            if self.reads % n == 0 {
                return false;
            }
        }

        let t = self.samples as f64 * 0.01;
        self.samples += 1;

        sample.timestamp = current_timestamp_micros();
        match self.motion {
            Motion::Level => {
                sample.gyro_raw = Vector3::zeros();
                sample.accel_raw = Vector3::new(0.0, 0.0, 9.81);
                sample.compass_raw = Vector3::new(0.2, 0.0, -0.4);
            }
            Motion::Wobble => {
                sample.gyro_raw = Vector3::new(
                    (t * 0.5).sin() * 0.05,
                    (t * 0.3).cos() * 0.03,
                    t.sin() * 0.1,
                );
                sample.accel_raw = Vector3::new(
                    (t * 2.0 * PI).sin() * 0.5,
                    (t * 2.0 * PI).cos() * 0.3,
                    9.81 + (t * PI).sin() * 0.1,
                );
                sample.compass_raw = Vector3::new(0.2 * t.cos(), 0.2 * t.sin(), -0.4);
            }
        }
        true
    }
}

/// Fake GPS creeping north-east from a fixed origin.
pub struct MockGps {
    seq: u64,
    fix_limit: Option<u64>,
}

impl MockGps {
    pub fn new() -> Self {
        Self {
            seq: 0,
            fix_limit: None,
        }
    }

    /// Stop producing fixes after `n` of them.
    pub fn with_fix_limit(mut self, n: u64) -> Self {
        self.fix_limit = Some(n);
        self
    }
}

impl Default for MockGps {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionSource for MockGps {
    fn poll_interval_millis(&self) -> u64 {
        1
    }

    fn read_fix(&mut self) -> Result<Option<PositionSample>> {
        if self.fix_limit.is_some_and(|limit| self.seq >= limit) {
            return Ok(None);
        }
        let seq = self.seq as f64;
        self.seq += 1;

        Ok(Some(PositionSample {
            timestamp: current_timestamp_micros(),
            latitude: 37.7749 + seq * 0.00001,
            latitude_hemisphere: 'N',
            longitude: 122.4194 - seq * 0.00001,
            longitude_hemisphere: 'W',
            num_satellites: 9,
            altitude: 16.0 + (seq * 0.1).sin(),
        }))
    }
}
