//! Sensor adapter contracts and the samplers that drive them from a device task

pub mod calibration;
pub mod mock;
pub mod nmea;

use std::thread;
use std::time::{Duration, Instant};

use crate::config::{EwmaConfig, FusionConfig};
use crate::device::Sampler;
use crate::error::{FlightError, Result};
use crate::filters::AttitudeFusion;
use crate::smoothing::SmoothedVector3;
use crate::types::{InertialSample, PositionSample, QuaternionExt, Vector3Ext};

/// Reads per cycle before the IMU sampler repeats its previous sample
pub const MAX_READ_ATTEMPTS: u32 = 10;
/// Polls per cycle before the GPS sampler repeats its last fix
pub const MAX_FIX_ATTEMPTS: u32 = 3;

/// Driver-level view of an inertial measurement unit.
pub trait InertialSensor: Send {
    fn name(&self) -> &str;

    /// Presence check, run once before `init`.
    fn discover(&mut self) -> bool;

    fn init(&mut self) -> Result<()>;

    /// How long to wait before retrying a read that returned no data.
    fn poll_interval_millis(&self) -> u64;

    /// Fill the raw fields of `sample`. `false` means no new data yet.
    fn read_sample(&mut self, delta_time: f64, sample: &mut InertialSample) -> bool;
}

impl<T: InertialSensor + ?Sized> InertialSensor for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn discover(&mut self) -> bool {
        (**self).discover()
    }

    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn poll_interval_millis(&self) -> u64 {
        (**self).poll_interval_millis()
    }

    fn read_sample(&mut self, delta_time: f64, sample: &mut InertialSample) -> bool {
        (**self).read_sample(delta_time, sample)
    }
}

/// Anything that can produce GPS fixes.
pub trait PositionSource: Send {
    fn poll_interval_millis(&self) -> u64;

    /// `Ok(None)` means no fix is available yet.
    fn read_fix(&mut self) -> Result<Option<PositionSample>>;
}

impl<T: PositionSource + ?Sized> PositionSource for Box<T> {
    fn poll_interval_millis(&self) -> u64 {
        (**self).poll_interval_millis()
    }

    fn read_fix(&mut self) -> Result<Option<PositionSample>> {
        (**self).read_fix()
    }
}

/// IMU task fetch routine: read, smooth, fuse.
///
/// `dt` for fusion is the wall-clock time since the previous successful read; the first read
/// uses the nominal sampling period.
pub struct ImuSampler<S> {
    sensor: S,
    fusion: AttitudeFusion,
    accel_smoothing: SmoothedVector3,
    smooth_accel: bool,
    nominal_dt: f64,
    last_read: Option<Instant>,
    last_sample: Option<InertialSample>,
}

impl<S: InertialSensor> ImuSampler<S> {
    /// Discovers and initialises the sensor; an absent sensor is `SensorNotFound`.
    pub fn new(
        mut sensor: S,
        fusion: &FusionConfig,
        ewma: &EwmaConfig,
        frequency_hz: u32,
    ) -> Result<Self> {
        if frequency_hz == 0 {
            return Err(FlightError::InvalidParameters(
                "imu frequency must be greater than 0".to_string(),
            ));
        }
        if !sensor.discover() {
            log::error!("[imu] {} not detected", sensor.name());
            return Err(FlightError::SensorNotFound(sensor.name().to_string()));
        }
        sensor.init()?;
        log::info!("[imu] {} ready", sensor.name());

        Ok(Self {
            sensor,
            fusion: AttitudeFusion::new(fusion.alpha),
            accel_smoothing: SmoothedVector3::new(ewma.alpha, ewma.outlier_fraction),
            smooth_accel: fusion.smooth_accel,
            nominal_dt: 1.0 / frequency_hz as f64,
            last_read: None,
            last_sample: None,
        })
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn fusion(&self) -> &AttitudeFusion {
        &self.fusion
    }

    fn read_with_retry(&mut self, dt: f64, sample: &mut InertialSample) -> bool {
        let retry = Duration::from_millis(self.sensor.poll_interval_millis());
        for attempt in 0..MAX_READ_ATTEMPTS {
            if self.sensor.read_sample(dt, sample) {
                return true;
            }
            if attempt + 1 < MAX_READ_ATTEMPTS {
                thread::sleep(retry);
            }
        }
        false
    }
}

impl<S: InertialSensor + 'static> Sampler for ImuSampler<S> {
    type Sample = InertialSample;

    fn fetch(&mut self, slot: &mut InertialSample) -> Result<()> {
        let dt = self
            .last_read
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(self.nominal_dt);

        let mut sample = InertialSample::default();
        if !self.read_with_retry(dt, &mut sample) {
            log::debug!("[imu] no data after {} attempts", MAX_READ_ATTEMPTS);
            return match &self.last_sample {
                Some(previous) => {
                    *slot = previous.clone();
                    Ok(())
                }
                None => Err(FlightError::NoData(self.sensor.name().to_string())),
            };
        }
        self.last_read = Some(Instant::now());

        self.accel_smoothing.set(&sample.accel_raw, sample.timestamp);
        sample.accel_smoothed = self.accel_smoothing.get();
        let accel = if self.smooth_accel {
            sample.accel_smoothed
        } else {
            sample.accel_raw
        };
        self.fusion.update_sample(dt, &accel, &mut sample);

        if self.fusion.updates() % 100 == 0 {
            log::debug!(
                "[imu] {}",
                sample.fused_estimate.to_euler().display_degrees("fused")
            );
        }

        *slot = sample.clone();
        self.last_sample = Some(sample);
        Ok(())
    }
}

/// GPS task fetch routine. Without a fresh fix the last known one is repeated.
pub struct GpsSampler<P> {
    source: P,
    last_fix: Option<PositionSample>,
    fixes: u64,
}

impl<P: PositionSource> GpsSampler<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            last_fix: None,
            fixes: 0,
        }
    }

    pub fn fixes(&self) -> u64 {
        self.fixes
    }
}

impl<P: PositionSource + 'static> Sampler for GpsSampler<P> {
    type Sample = PositionSample;

    fn fetch(&mut self, slot: &mut PositionSample) -> Result<()> {
        let retry = Duration::from_millis(self.source.poll_interval_millis());
        for attempt in 0..MAX_FIX_ATTEMPTS {
            match self.source.read_fix() {
                Ok(Some(fix)) => {
                    self.fixes += 1;
                    if self.fixes % 100 == 1 {
                        log::info!(
                            "[gps] fix #{}: {:.6}, {:.6} ({} satellites)",
                            self.fixes,
                            fix.signed_latitude(),
                            fix.signed_longitude(),
                            fix.num_satellites
                        );
                    }
                    *slot = fix.clone();
                    self.last_fix = Some(fix);
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => log::warn!("[gps] read failed: {}", e),
            }
            if attempt + 1 < MAX_FIX_ATTEMPTS {
                thread::sleep(retry);
            }
        }

        match &self.last_fix {
            Some(fix) => {
                *slot = fix.clone();
                Ok(())
            }
            None => Err(FlightError::NoData("gps".to_string())),
        }
    }
}
