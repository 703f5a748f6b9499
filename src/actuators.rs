//! Motor outputs: normalised commands, ESC pulse widths and the quad mixer

use std::thread;
use std::time::Duration;

use crate::error::{FlightError, Result};
use crate::types::ControlSample;

/// ESC pulse width for zero throttle, in microseconds
pub const ESC_MIN_US: u32 = 1000;
/// Full-scale pulse width, only sent while arming
pub const ESC_MAX_US: u32 = 2000;
/// Ceiling for a commanded pulse width
pub const SAFETY_LIMIT_US: u32 = 1200;

pub trait Actuator: Send {
    /// `value` in [0, 1]; anything else (NaN included) is rejected.
    fn set_normalized_command(&mut self, value: f64) -> Result<()>;
}

fn check_command(value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FlightError::InvalidParameters(format!(
            "motor command {} outside [0, 1]",
            value
        )))
    }
}

/// Hardware seam: something that can hold a servo-style pulse on one pin.
pub trait PulseOutput: Send {
    /// `0` switches the pulse off.
    fn set_pulse_width(&mut self, micros: u32) -> Result<()>;
}

/// Keeps every pulse it was asked for. Used for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingPulse {
    pulses: Vec<u32>,
}

impl RecordingPulse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulses(&self) -> &[u32] {
        &self.pulses
    }

    pub fn last(&self) -> Option<u32> {
        self.pulses.last().copied()
    }
}

impl PulseOutput for RecordingPulse {
    fn set_pulse_width(&mut self, micros: u32) -> Result<()> {
        self.pulses.push(micros);
        Ok(())
    }
}

/// Maps [0, 1] onto `ESC_MIN_US..=SAFETY_LIMIT_US`.
pub fn pulse_width_for(value: f64) -> u32 {
    let span = (SAFETY_LIMIT_US - ESC_MIN_US) as f64;
    ESC_MIN_US + (span * value.clamp(0.0, 1.0)).round() as u32
}

pub struct EscMotor<P> {
    name: String,
    output: P,
    arm_step: Duration,
    armed: bool,
}

impl<P: PulseOutput> EscMotor<P> {
    pub fn new(name: &str, output: P) -> Self {
        Self {
            name: name.to_string(),
            output,
            arm_step: Duration::from_secs(1),
            armed: false,
        }
    }

    /// Pause between the pulses of the arming sequence.
    pub fn with_arm_step(mut self, step: Duration) -> Self {
        self.arm_step = step;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &P {
        &self.output
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Off, full scale, then zero throttle, holding each for one arm step.
    pub fn arm(&mut self) -> Result<()> {
        log::info!("[esc] arming {}", self.name);
        for pulse in [0, ESC_MAX_US, ESC_MIN_US] {
            self.output.set_pulse_width(pulse)?;
            thread::sleep(self.arm_step);
        }
        self.armed = true;
        Ok(())
    }

    /// Back to zero throttle.
    pub fn stop(&mut self) -> Result<()> {
        self.output.set_pulse_width(ESC_MIN_US)
    }
}

impl<P: PulseOutput> Actuator for EscMotor<P> {
    fn set_normalized_command(&mut self, value: f64) -> Result<()> {
        check_command(value)?;
        if !self.armed {
            log::warn!("[esc] {} commanded before arming", self.name);
        }
        self.output.set_pulse_width(pulse_width_for(value))
    }
}

/// Motor positions of a "+" quad, in mixer order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorPosition {
    Front,
    Right,
    Back,
    Left,
}

pub const MOTOR_ORDER: [MotorPosition; 4] = [
    MotorPosition::Front,
    MotorPosition::Right,
    MotorPosition::Back,
    MotorPosition::Left,
];

/// Turns one control sample into four motor commands.
///
/// Front and back props spin one way, left and right the other, so yaw is a differential
/// between the two pairs. Altitude control adds to the hover throttle on all four.
pub struct MotorMixer {
    hover_throttle: f64,
    motors: [Box<dyn Actuator>; 4],
}

impl MotorMixer {
    /// `motors` in `MOTOR_ORDER`.
    pub fn new(hover_throttle: f64, motors: [Box<dyn Actuator>; 4]) -> Result<Self> {
        check_command(hover_throttle)?;
        Ok(Self {
            hover_throttle,
            motors,
        })
    }

    pub fn mix(&self, sample: &ControlSample) -> [f64; 4] {
        let collective = self.hover_throttle + sample.altitude_control;
        let pitch = sample.attitude_control.pitch;
        let roll = sample.attitude_control.roll;
        let yaw = sample.attitude_control.yaw;

        let front = collective + pitch - yaw;
        let right = collective - roll + yaw;
        let back = collective - pitch - yaw;
        let left = collective + roll + yaw;

        [front, right, back, left].map(|c| if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) })
    }

    pub fn apply(&mut self, sample: &ControlSample) -> Result<[f64; 4]> {
        let commands = self.mix(sample);
        for (motor, command) in self.motors.iter_mut().zip(commands) {
            motor.set_normalized_command(command)?;
        }
        Ok(commands)
    }

    /// All motors to zero throttle.
    pub fn idle(&mut self) -> Result<()> {
        for motor in self.motors.iter_mut() {
            motor.set_normalized_command(0.0)?;
        }
        Ok(())
    }
}
