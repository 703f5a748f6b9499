use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::control::pid::PidGains;
use crate::error::{FlightError, Result};

/// One device task and the port its stream is served on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub port: u16,
    pub frequency_hz: u32,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1
}

impl TaskConfig {
    pub fn new(port: u16, frequency_hz: u32) -> Self {
        Self {
            port,
            frequency_hz,
            capacity: default_capacity(),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.frequency_hz == 0 {
            return Err(FlightError::Config(format!(
                "{}: frequency_hz must be greater than 0",
                name
            )));
        }
        if self.capacity == 0 {
            return Err(FlightError::Config(format!(
                "{}: capacity must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight on the gyro path; `1 - alpha` of the tilt error is corrected per step
    pub alpha: f64,
    /// Feed the EWMA-smoothed accelerometer into tilt correction instead of the raw one
    pub smooth_accel: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.9,
            smooth_accel: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaConfig {
    pub alpha: f64,
    pub outlier_fraction: f64,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self {
            alpha: 0.9,
            outlier_fraction: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlGains {
    pub yaw: PidGains,
    pub pitch: PidGains,
    pub roll: PidGains,
    pub altitude: PidGains,
}

impl Default for ControlGains {
    fn default() -> Self {
        let unit = PidGains::new(1.0, 1.0, 1.0);
        Self {
            yaw: unit,
            pitch: unit,
            roll: unit,
            altitude: unit,
        }
    }
}

/// Everything the vehicle and the stream binaries need to start.
///
/// Every field has a default, so a config file only has to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub host: String,
    pub gps: TaskConfig,
    pub imu: TaskConfig,
    pub control: TaskConfig,
    /// Push rate requested by the stream clients
    pub client_frequency_hz: u32,
    pub fusion: FusionConfig,
    pub ewma: EwmaConfig,
    pub gains: ControlGains,
    /// Bench mode: stream everything but never command the motors
    pub dry_run: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            gps: TaskConfig::new(5000, 10),
            imu: TaskConfig::new(5001, 100),
            control: TaskConfig::new(5002, 20),
            client_frequency_hz: 20,
            fusion: FusionConfig::default(),
            ewma: EwmaConfig::default(),
            gains: ControlGains::default(),
            dry_run: false,
        }
    }
}

impl StationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlightError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: StationConfig = serde_json::from_str(&text)
            .map_err(|e| FlightError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults unless `path` is given.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.gps.validate("gps")?;
        self.imu.validate("imu")?;
        self.control.validate("control")?;
        if !(0.0..=1.0).contains(&self.fusion.alpha) {
            return Err(FlightError::Config(format!(
                "fusion.alpha must be in [0, 1], got {}",
                self.fusion.alpha
            )));
        }
        if !(self.ewma.outlier_fraction > 0.0 && self.ewma.outlier_fraction <= 1.0) {
            return Err(FlightError::Config(format!(
                "ewma.outlier_fraction must be in (0, 1], got {}",
                self.ewma.outlier_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_station_layout() {
        let config = StationConfig::default();
        assert_eq!(config.gps, TaskConfig::new(5000, 10));
        assert_eq!(config.imu.port, 5001);
        assert_eq!(config.imu.frequency_hz, 100);
        assert_eq!(config.control.frequency_hz, 20);
        assert_eq!(config.client_frequency_hz, 20);
        assert_eq!(config.gains.yaw, PidGains::new(1.0, 1.0, 1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: StationConfig =
            serde_json::from_str(r#"{"host":"0.0.0.0","fusion":{"alpha":0.95}}"#).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.fusion.alpha, 0.95);
        assert!(!config.fusion.smooth_accel);
        assert_eq!(config.imu, StationConfig::default().imu);
    }

    #[test]
    fn test_validate_rejects_zero_frequency() {
        let mut config = StationConfig::default();
        config.control.frequency_hz = 0;
        assert!(matches!(config.validate(), Err(FlightError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = StationConfig::default();
        config.gps.capacity = 0;
        assert!(matches!(config.validate(), Err(FlightError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("station_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"imu":{"port":6001,"frequency_hz":50,"capacity":4}}"#).unwrap();
        let config = StationConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.imu, TaskConfig { port: 6001, frequency_hz: 50, capacity: 4 });

        let missing = StationConfig::load(&path);
        assert!(matches!(missing, Err(FlightError::Config(_))));
    }
}
