use std::f64::consts::PI;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Smallest interval fed into the integral and derivative terms.
pub const MIN_DT_SECS: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// How the error between reference and measurement is formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMode {
    /// `reference - measured`
    Linear,
    /// Shortest signed angle from `measured` to `reference`, in radians
    Angular,
}

pub trait Controller: Send {
    fn control(&mut self, reference: f64, measured: f64) -> f64;
}

/// Wraps `reference - measured` into (-pi, pi].
pub fn angular_error(reference: f64, measured: f64) -> f64 {
    let mut error = (reference - measured) % (2.0 * PI);
    if error > PI {
        error -= 2.0 * PI;
    } else if error <= -PI {
        error += 2.0 * PI;
    }
    error
}

/// `u = kp * e + ki * integral(e dt) + kd * de/dt`
///
/// No output clamping and no anti-windup. `control` measures `dt` on the wall clock since the
/// previous call (or construction) and floors it at `MIN_DT_SECS`.
#[derive(Clone, Debug)]
pub struct Pid {
    gains: PidGains,
    mode: ErrorMode,
    last_call: Instant,
    last_error: f64,
    integral: f64,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self::with_mode(gains, ErrorMode::Linear)
    }

    pub fn with_mode(gains: PidGains, mode: ErrorMode) -> Self {
        Self {
            gains,
            mode,
            last_call: Instant::now(),
            last_error: 0.0,
            integral: 0.0,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    pub fn error(&self, reference: f64, measured: f64) -> f64 {
        match self.mode {
            ErrorMode::Linear => reference - measured,
            ErrorMode::Angular => angular_error(reference, measured),
        }
    }

    /// One update with an explicit interval; the wall clock is left alone.
    pub fn control_with_dt(&mut self, reference: f64, measured: f64, dt: f64) -> f64 {
        let dt = dt.max(MIN_DT_SECS);
        let error = self.error(reference, measured);

        self.integral += error * dt;
        let derivative = (error - self.last_error) / dt;
        self.last_error = error;

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_call = Instant::now();
    }
}

impl Controller for Pid {
    fn control(&mut self, reference: f64, measured: f64) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_call).as_secs_f64();
        self.last_call = now;
        self.control_with_dt(reference, measured, dt)
    }
}
