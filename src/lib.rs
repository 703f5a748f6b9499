//! Flight-station core: periodic device tasks for GPS, IMU and attitude control, the
//! newline-framed TCP streaming that exposes them, and the motor mixer they feed.

pub mod actuators;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod filters;
pub mod sensors;
pub mod smoothing;
pub mod stream;
pub mod types;
pub mod vehicle;

pub use config::StationConfig;
pub use device::{BufferSnapshot, DeviceTask, RollingBuffer, Sampler};
pub use error::{FlightError, Result};
pub use types::{Attitude, ControlSample, InertialSample, PositionSample, Quaternion, Vector3};
pub use vehicle::Vehicle;
