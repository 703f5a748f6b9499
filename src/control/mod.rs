pub mod pid;

use std::sync::Arc;

use crate::config::ControlGains;
use crate::device::{DeviceTask, LatestSample, Sampler};
use crate::error::Result;
use crate::types::{
    current_timestamp_micros, Attitude, ControlSample, InertialSample, PositionSample,
    QuaternionExt, Vector3Ext,
};

use pid::{Controller, ErrorMode, Pid};

/// Control task fetch routine: one PID per axis driven by the IMU task's fused estimate.
///
/// Yaw error wraps at +-pi; the other axes are linear. Measured altitude comes from the
/// position task when one is attached, and is 0.0 otherwise.
pub struct AttitudeControlSampler {
    imu: Arc<dyn LatestSample<InertialSample>>,
    position: Option<Arc<dyn LatestSample<PositionSample>>>,
    yaw: Pid,
    pitch: Pid,
    roll: Pid,
    altitude: Pid,
    reference_attitude: Attitude,
    reference_altitude: f64,
    cycles: u64,
}

impl AttitudeControlSampler {
    pub fn new(imu: Arc<dyn LatestSample<InertialSample>>, gains: &ControlGains) -> Self {
        Self {
            imu,
            position: None,
            yaw: Pid::with_mode(gains.yaw, ErrorMode::Angular),
            pitch: Pid::new(gains.pitch),
            roll: Pid::new(gains.roll),
            altitude: Pid::new(gains.altitude),
            reference_attitude: Attitude::default(),
            reference_altitude: 0.0,
            cycles: 0,
        }
    }

    pub fn with_position(mut self, position: Arc<dyn LatestSample<PositionSample>>) -> Self {
        self.position = Some(position);
        self
    }

    pub fn reference(&self) -> (Attitude, f64) {
        (self.reference_attitude, self.reference_altitude)
    }

    pub fn set_reference(&mut self, attitude: Attitude, altitude: f64) {
        self.reference_attitude = attitude;
        self.reference_altitude = altitude;
    }

    fn measured_altitude(&self) -> Result<f64> {
        match &self.position {
            Some(position) => Ok(position.latest()?.map(|fix| fix.altitude).unwrap_or(0.0)),
            None => Ok(0.0),
        }
    }
}

impl Sampler for AttitudeControlSampler {
    type Sample = ControlSample;

    fn fetch(&mut self, slot: &mut ControlSample) -> Result<()> {
        slot.timestamp = current_timestamp_micros();
        slot.reference_attitude = self.reference_attitude;
        slot.reference_altitude = self.reference_altitude;

        let Some(inertial) = self.imu.latest()? else {
            log::debug!("[control] waiting for the first imu sample");
            slot.attitude_control = Attitude::default();
            slot.altitude_control = 0.0;
            return Ok(());
        };

        let measured = Attitude::from_euler(&inertial.fused_estimate.to_euler());
        let measured_altitude = self.measured_altitude()?;
        let reference = self.reference_attitude;

        slot.attitude_control = Attitude {
            yaw: self.yaw.control(reference.yaw, measured.yaw),
            pitch: self.pitch.control(reference.pitch, measured.pitch),
            roll: self.roll.control(reference.roll, measured.roll),
        };
        slot.altitude_control = self
            .altitude
            .control(self.reference_altitude, measured_altitude);

        self.cycles += 1;
        if self.cycles % 100 == 0 {
            log::debug!("[control] {}", measured.to_euler().display_degrees("measured"));
        }
        Ok(())
    }
}

impl DeviceTask<AttitudeControlSampler> {
    /// New control reference, applied under the task lock. The current slot's reference
    /// fields are updated too so readers see the change before the next cycle.
    pub fn set_reference(&self, yaw: f64, pitch: f64, roll: f64, altitude: f64) -> Result<()> {
        let attitude = Attitude::new(yaw, pitch, roll);
        self.with_sampler(|sampler, buffer| {
            sampler.set_reference(attitude, altitude);
            if let Some(slot) = buffer.current_mut() {
                slot.reference_attitude = attitude;
                slot.reference_altitude = altitude;
            }
        })?;
        log::info!(
            "[control] reference yaw {:.3} pitch {:.3} roll {:.3} altitude {:.1}",
            yaw,
            pitch,
            roll,
            altitude
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::pid::PidGains;
    use super::*;
    use crate::error::FlightError;
    use crate::types::{Quaternion, Vector3};
    use approx::assert_abs_diff_eq;
    use std::sync::Mutex;

    struct Fixed<T>(Mutex<Option<T>>);

    impl<T: Clone + Send> LatestSample<T> for Fixed<T> {
        fn latest(&self) -> Result<Option<T>> {
            let guard = self.0.lock().map_err(|_| FlightError::poisoned("fixed"))?;
            Ok(guard.clone())
        }
    }

    fn proportional() -> ControlGains {
        let p = PidGains::new(1.0, 0.0, 0.0);
        ControlGains {
            yaw: p,
            pitch: p,
            roll: p,
            altitude: p,
        }
    }

    fn tilted_imu(roll: f64) -> Arc<Fixed<InertialSample>> {
        let sample = InertialSample {
            fused_estimate: Quaternion::from_euler(&Vector3::new(roll, 0.0, 0.0)),
            ..InertialSample::default()
        };
        Arc::new(Fixed(Mutex::new(Some(sample))))
    }

    #[test]
    fn test_no_imu_sample_gives_zero_output() {
        let imu: Arc<Fixed<InertialSample>> = Arc::new(Fixed(Mutex::new(None)));
        let mut sampler = AttitudeControlSampler::new(imu, &proportional());
        sampler.set_reference(Attitude::new(0.5, 0.0, 0.0), 10.0);

        let mut slot = ControlSample::default();
        sampler.fetch(&mut slot).unwrap();
        assert_eq!(slot.attitude_control, Attitude::default());
        assert_eq!(slot.altitude_control, 0.0);
        assert_eq!(slot.reference_attitude.yaw, 0.5);
        assert_eq!(slot.reference_altitude, 10.0);
    }

    #[test]
    fn test_proportional_correction_of_roll() {
        let mut sampler = AttitudeControlSampler::new(tilted_imu(0.2), &proportional());
        let mut slot = ControlSample::default();
        sampler.fetch(&mut slot).unwrap();
        assert_abs_diff_eq!(slot.attitude_control.roll, -0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(slot.attitude_control.pitch, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(slot.attitude_control.yaw, 0.0, epsilon = 1e-9);
        // No position source: measured altitude is 0
        assert_eq!(slot.altitude_control, 0.0);
    }

    #[test]
    fn test_altitude_from_position_source() {
        let fix = PositionSample {
            altitude: 40.0,
            ..PositionSample::default()
        };
        let position: Arc<Fixed<PositionSample>> = Arc::new(Fixed(Mutex::new(Some(fix))));
        let mut sampler =
            AttitudeControlSampler::new(tilted_imu(0.0), &proportional()).with_position(position);
        sampler.set_reference(Attitude::default(), 50.0);

        let mut slot = ControlSample::default();
        sampler.fetch(&mut slot).unwrap();
        assert_abs_diff_eq!(slot.altitude_control, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_reference_through_task_stamps_current_slot() {
        let sampler = AttitudeControlSampler::new(tilted_imu(0.0), &proportional());
        let task = DeviceTask::new("control", 20, 1, sampler).unwrap();
        task.sample_once().unwrap();

        task.set_reference(0.1, 0.2, 0.3, 5.0).unwrap();
        let current = task.get_data().unwrap().unwrap();
        assert_eq!(current.reference_attitude, Attitude::new(0.1, 0.2, 0.3));
        assert_eq!(current.reference_altitude, 5.0);

        let (attitude, altitude) = task.with_sampler(|s, _| s.reference()).unwrap();
        assert_eq!(attitude, Attitude::new(0.1, 0.2, 0.3));
        assert_eq!(altitude, 5.0);
    }
}
