pub mod math;
pub mod wire;

pub use math::*;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Anything a device task can buffer and stream: default-constructible, copyable, serialisable.
pub trait Sample: Default + Clone + Serialize + Send + 'static {}

impl<T: Default + Clone + Serialize + Send + 'static> Sample for T {}

/// Microseconds since the Unix epoch.
pub fn current_timestamp_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// One IMU cycle: raw readings plus the three attitude estimates derived from them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InertialSample {
    pub timestamp: i64,
    #[serde(with = "wire::vec3")]
    pub gyro_raw: Vector3,
    #[serde(with = "wire::vec3")]
    pub accel_raw: Vector3,
    #[serde(with = "wire::vec3")]
    pub compass_raw: Vector3,
    /// Per-axis EWMA of `accel_raw`
    #[serde(with = "wire::vec3")]
    pub accel_smoothed: Vector3,
    /// Pure rate integration
    #[serde(with = "wire::quat")]
    pub gyro_only_estimate: Quaternion,
    /// Pure accelerometer tilt
    #[serde(with = "wire::quat")]
    pub accel_tilt_estimate: Quaternion,
    /// Complementary blend; always unit norm
    #[serde(with = "wire::quat")]
    pub fused_estimate: Quaternion,
}

impl Default for InertialSample {
    fn default() -> Self {
        Self {
            timestamp: current_timestamp_micros(),
            gyro_raw: Vector3::zeros(),
            accel_raw: Vector3::zeros(),
            compass_raw: Vector3::zeros(),
            accel_smoothed: Vector3::zeros(),
            gyro_only_estimate: Quaternion::identity(),
            accel_tilt_estimate: Quaternion::identity(),
            fused_estimate: Quaternion::identity(),
        }
    }
}

/// A GPS fix. Coordinates are unsigned degrees qualified by their hemisphere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PositionWire", into = "PositionWire")]
pub struct PositionSample {
    pub timestamp: i64,
    pub latitude: f64,
    pub latitude_hemisphere: char,
    pub longitude: f64,
    pub longitude_hemisphere: char,
    pub num_satellites: u32,
    /// Meters above mean sea level
    pub altitude: f64,
}

impl Default for PositionSample {
    fn default() -> Self {
        Self {
            timestamp: current_timestamp_micros(),
            latitude: 0.0,
            latitude_hemisphere: 'N',
            longitude: 0.0,
            longitude_hemisphere: 'W',
            num_satellites: 0,
            altitude: 0.0,
        }
    }
}

impl PositionSample {
    /// Latitude in signed degrees (south negative).
    pub fn signed_latitude(&self) -> f64 {
        if self.latitude_hemisphere == 'S' {
            -self.latitude
        } else {
            self.latitude
        }
    }

    /// Longitude in signed degrees (west negative).
    pub fn signed_longitude(&self) -> f64 {
        if self.longitude_hemisphere == 'W' {
            -self.longitude
        } else {
            self.longitude
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionWire {
    timestamp: i64,
    latitude: String,
    longitude: String,
    altitude: f64,
    num_satellites: u32,
}

impl From<PositionSample> for PositionWire {
    fn from(p: PositionSample) -> Self {
        Self {
            timestamp: p.timestamp,
            latitude: wire::format_coordinate(p.latitude, p.latitude_hemisphere),
            longitude: wire::format_coordinate(p.longitude, p.longitude_hemisphere),
            altitude: p.altitude,
            num_satellites: p.num_satellites,
        }
    }
}

impl TryFrom<PositionWire> for PositionSample {
    type Error = String;

    fn try_from(w: PositionWire) -> Result<Self, Self::Error> {
        let (latitude, latitude_hemisphere) = wire::parse_coordinate(&w.latitude)
            .ok_or_else(|| format!("invalid latitude '{}'", w.latitude))?;
        let (longitude, longitude_hemisphere) = wire::parse_coordinate(&w.longitude)
            .ok_or_else(|| format!("invalid longitude '{}'", w.longitude))?;
        Ok(Self {
            timestamp: w.timestamp,
            latitude,
            latitude_hemisphere,
            longitude,
            longitude_hemisphere,
            num_satellites: w.num_satellites,
            altitude: w.altitude,
        })
    }
}

/// Yaw/pitch/roll triple in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Attitude {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// From the (roll, pitch, yaw) vector produced by `QuaternionExt::to_euler`.
    pub fn from_euler(euler: &Vector3) -> Self {
        Self {
            yaw: euler.z,
            pitch: euler.y,
            roll: euler.x,
        }
    }

    pub fn to_euler(&self) -> Vector3 {
        Vector3::new(self.roll, self.pitch, self.yaw)
    }
}

/// Output of one control cycle together with the reference that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSample {
    pub timestamp: i64,
    pub attitude_control: Attitude,
    pub altitude_control: f64,
    pub reference_attitude: Attitude,
    pub reference_altitude: f64,
}

impl Default for ControlSample {
    fn default() -> Self {
        Self {
            timestamp: current_timestamp_micros(),
            attitude_control: Attitude::default(),
            altitude_control: 0.0,
            reference_attitude: Attitude::default(),
            reference_altitude: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inertial_sample_json_is_single_line() {
        let sample = InertialSample::default();
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""fusedEstimate":{"scalar":1.0,"x":0.0,"y":0.0,"z":0.0}"#));
        assert!(json.contains(r#""gyroRaw":{"x":0.0"#));
    }

    #[test]
    fn test_position_sample_wire_format() {
        let fix = PositionSample {
            timestamp: 42,
            latitude: 37.5,
            latitude_hemisphere: 'N',
            longitude: 122.25,
            longitude_hemisphere: 'W',
            num_satellites: 11,
            altitude: 48.0,
        };
        let json = serde_json::to_string(&fix).unwrap();
        assert!(json.contains(r#""latitude":"37.500000N""#));
        assert!(json.contains(r#""longitude":"122.250000W""#));
        assert!(json.contains(r#""numSatellites":11"#));

        let back: PositionSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fix);
        assert_eq!(back.signed_longitude(), -122.25);
        assert_eq!(back.signed_latitude(), 37.5);
    }

    #[test]
    fn test_position_sample_rejects_bad_coordinate() {
        let json = r#"{"timestamp":1,"latitude":"37.5X","longitude":"1.0E","altitude":0.0,"numSatellites":0}"#;
        assert!(serde_json::from_str::<PositionSample>(json).is_err());
    }

    #[test]
    fn test_control_sample_field_names() {
        let json = serde_json::to_string(&ControlSample::default()).unwrap();
        assert!(json.contains(r#""attitudeControl":{"yaw":0.0,"pitch":0.0,"roll":0.0}"#));
        assert!(json.contains(r#""referenceAltitude":0.0"#));
    }

    #[test]
    fn test_attitude_euler_mapping() {
        let a = Attitude::from_euler(&Vector3::new(0.1, 0.2, 0.3));
        assert_eq!(a, Attitude::new(0.3, 0.2, 0.1));
        assert_eq!(a.to_euler(), Vector3::new(0.1, 0.2, 0.3));
    }
}
