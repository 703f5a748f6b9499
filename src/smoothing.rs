use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::types::{current_timestamp_micros, Vector3};

/// Calls folded in unconditionally before outlier rejection kicks in
pub const WARMUP_COUNT: u32 = 100;
/// Consecutive outliers after which the filter accepts the new level
pub const MAX_OUTLIER_COUNT: u32 = 10;

/// Outlier-tolerant exponentially weighted moving average
///
/// During warmup every value is folded in and returned as-is. Afterwards a value is an
/// outlier when it is below `outlier_fraction * |avg|` or above `|avg| / outlier_fraction`;
/// outliers are answered with the stale average until `MAX_OUTLIER_COUNT` of them arrive in
/// a row, at which point the filter gives in and tracks the new level.
#[derive(Clone, Debug)]
pub struct Ewma {
    alpha: f64,
    outlier_fraction: f64,
    moving_average: f64,
    warmup_count: u32,
    outlier_count: u32,
    in_warmup: bool,
    last_was_outlier: bool,
}

impl Ewma {
    pub fn new(alpha: f64, outlier_fraction: f64) -> Self {
        Ewma {
            alpha,
            outlier_fraction,
            moving_average: 0.0,
            warmup_count: 0,
            outlier_count: 0,
            in_warmup: true,
            last_was_outlier: false,
        }
    }

    /// Current moving average
    pub fn get(&self) -> f64 {
        self.moving_average
    }

    pub fn is_warming_up(&self) -> bool {
        self.in_warmup
    }

    pub fn outlier_run(&self) -> u32 {
        self.outlier_count
    }

    pub fn last_was_outlier(&self) -> bool {
        self.last_was_outlier
    }

    /// Feed one value; returns either the value itself or, while rejecting an outlier, the
    /// stale average.
    pub fn apply(&mut self, value: f64) -> f64 {
        if self.in_warmup {
            self.warmup_count += 1;
            if self.warmup_count >= WARMUP_COUNT {
                self.in_warmup = false;
            }
            self.fold(value);
            return value;
        }

        if !self.is_outlier(value) {
            self.last_was_outlier = false;
            self.outlier_count = 0;
            self.fold(value);
            return value;
        }

        self.last_was_outlier = true;
        self.outlier_count += 1;
        if self.outlier_count < MAX_OUTLIER_COUNT {
            return self.moving_average;
        }

        self.outlier_count = MAX_OUTLIER_COUNT;
        self.fold(value);
        value
    }

    fn is_outlier(&self, value: f64) -> bool {
        let magnitude = value.abs();
        let average = self.moving_average.abs();
        magnitude < self.outlier_fraction * average || magnitude > average / self.outlier_fraction
    }

    fn fold(&mut self, value: f64) {
        self.moving_average = self.alpha * self.moving_average + (1.0 - self.alpha) * value;
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(0.9, 0.5)
    }
}

/// A scalar sensor channel: the latest raw reading plus its EWMA
#[derive(Clone, Debug, Default)]
pub struct DeviceValue {
    timestamp: i64,
    raw_value: f64,
    ewma: Ewma,
}

impl DeviceValue {
    pub fn new(ewma: Ewma) -> Self {
        DeviceValue {
            timestamp: current_timestamp_micros(),
            raw_value: 0.0,
            ewma,
        }
    }

    /// Smoothed value
    pub fn get(&self) -> f64 {
        self.ewma.get()
    }

    pub fn set(&mut self, value: f64, timestamp: i64) {
        self.timestamp = timestamp;
        self.raw_value = value;
        self.ewma.apply(value);
    }

    pub fn raw_value(&self) -> f64 {
        self.raw_value
    }

    /// Overwrites the raw reading without feeding the filter.
    pub fn set_raw_value(&mut self, value: f64) {
        self.raw_value = value;
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Serialize for DeviceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DeviceValue", 3)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("rawValue", &self.raw_value)?;
        state.serialize_field("ewmaValue", &self.ewma.get())?;
        state.end()
    }
}

/// Three independent `DeviceValue` channels, one per axis
#[derive(Clone, Debug, Default)]
pub struct SmoothedVector3 {
    axes: [DeviceValue; 3],
}

impl SmoothedVector3 {
    pub fn new(alpha: f64, outlier_fraction: f64) -> Self {
        let channel = || DeviceValue::new(Ewma::new(alpha, outlier_fraction));
        SmoothedVector3 {
            axes: [channel(), channel(), channel()],
        }
    }

    pub fn set(&mut self, value: &Vector3, timestamp: i64) {
        for (axis, component) in self.axes.iter_mut().zip(value.iter()) {
            axis.set(*component, timestamp);
        }
    }

    pub fn get(&self) -> Vector3 {
        Vector3::new(self.axes[0].get(), self.axes[1].get(), self.axes[2].get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmed_up(value: f64) -> Ewma {
        let mut ewma = Ewma::default();
        for _ in 0..WARMUP_COUNT {
            ewma.apply(value);
        }
        ewma
    }

    #[test]
    fn test_warmup_returns_raw_values() {
        let mut ewma = Ewma::default();
        for i in 0..WARMUP_COUNT {
            let value = if i % 2 == 0 { 1000.0 } else { -3.0 };
            assert_eq!(ewma.apply(value), value);
        }
        assert!(!ewma.is_warming_up());
    }

    #[test]
    fn test_warmup_folds_into_average() {
        let mut ewma = Ewma::default();
        ewma.apply(10.0);
        assert!((ewma.get() - 1.0).abs() < 1e-12);
        ewma.apply(10.0);
        assert!((ewma.get() - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_steady_non_outliers_update_every_call() {
        let mut ewma = warmed_up(10.0);
        let mut previous = ewma.get();
        for _ in 0..(MAX_OUTLIER_COUNT * 2) {
            assert_eq!(ewma.apply(10.0), 10.0);
            assert!(ewma.get() > previous);
            assert_eq!(ewma.outlier_run(), 0);
            previous = ewma.get();
        }
    }

    #[test]
    fn test_outlier_returns_stale_average() {
        let mut ewma = warmed_up(10.0);
        let average = ewma.get();
        assert_eq!(ewma.apply(100.0), average);
        assert_eq!(ewma.get(), average);
        assert!(ewma.last_was_outlier());
        assert_eq!(ewma.outlier_run(), 1);

        // Too small is an outlier as well
        assert_eq!(ewma.apply(1.0), average);
        assert_eq!(ewma.outlier_run(), 2);
    }

    #[test]
    fn test_outlier_run_force_accepts_at_cap() {
        let mut ewma = warmed_up(10.0);
        let average = ewma.get();
        for _ in 0..(MAX_OUTLIER_COUNT - 1) {
            assert_eq!(ewma.apply(100.0), average);
        }
        assert_eq!(ewma.apply(100.0), 100.0);
        assert_eq!(ewma.outlier_run(), MAX_OUTLIER_COUNT);
        assert!(ewma.get() > average);

        // Run stays clamped while the new level keeps coming
        ewma.apply(100.0);
        assert_eq!(ewma.outlier_run(), MAX_OUTLIER_COUNT);
    }

    #[test]
    fn test_non_outlier_resets_run() {
        let mut ewma = warmed_up(10.0);
        ewma.apply(100.0);
        ewma.apply(100.0);
        assert_eq!(ewma.apply(10.0), 10.0);
        assert_eq!(ewma.outlier_run(), 0);
        assert!(!ewma.last_was_outlier());
    }

    #[test]
    fn test_device_value_json() {
        let mut value = DeviceValue::new(Ewma::default());
        value.set(10.0, 7);
        assert_eq!(value.raw_value(), 10.0);
        let json: serde_json::Value = serde_json::to_value(&value).unwrap();
        assert_eq!(json["timestamp"], 7);
        assert_eq!(json["rawValue"], 10.0);
        assert_eq!(json["ewmaValue"].as_f64(), Some(value.get()));
    }

    #[test]
    fn test_smoothed_vector_tracks_each_axis() {
        let mut channel = SmoothedVector3::new(0.5, 0.5);
        channel.set(&Vector3::new(2.0, 4.0, 8.0), 1);
        assert_eq!(channel.get(), Vector3::new(1.0, 2.0, 4.0));
    }
}
