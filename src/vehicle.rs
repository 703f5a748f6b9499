use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::actuators::MotorMixer;
use crate::config::{StationConfig, TaskConfig};
use crate::control::AttitudeControlSampler;
use crate::device::{DeviceTask, SnapshotSource};
use crate::error::{FlightError, Result};
use crate::sensors::{GpsSampler, ImuSampler, InertialSensor, PositionSource};
use crate::stream::StreamServer;

pub type GpsTask = DeviceTask<GpsSampler<Box<dyn PositionSource>>>;
pub type ImuTask = DeviceTask<ImuSampler<Box<dyn InertialSensor>>>;
pub type ControlTask = DeviceTask<AttitudeControlSampler>;

/// The whole station: GPS, IMU and control tasks, one stream server per task, and the
/// motor loop that turns control samples into motor commands.
pub struct Vehicle {
    config: StationConfig,
    gps: Arc<GpsTask>,
    imu: Arc<ImuTask>,
    control: Arc<ControlTask>,
    servers: Vec<Arc<StreamServer>>,
    mixer: Option<MotorMixer>,
    stop: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
}

impl Vehicle {
    /// Builds the three tasks. Fails with `SensorNotFound` when the IMU is absent.
    pub fn new(
        config: StationConfig,
        imu_sensor: Box<dyn InertialSensor>,
        position_source: Box<dyn PositionSource>,
    ) -> Result<Self> {
        config.validate()?;

        let gps = Arc::new(DeviceTask::new(
            "gps",
            config.gps.frequency_hz,
            config.gps.capacity,
            GpsSampler::new(position_source),
        )?);

        let imu_sampler = ImuSampler::new(
            imu_sensor,
            &config.fusion,
            &config.ewma,
            config.imu.frequency_hz,
        )?;
        let imu = Arc::new(DeviceTask::new(
            "imu",
            config.imu.frequency_hz,
            config.imu.capacity,
            imu_sampler,
        )?);

        let control_sampler =
            AttitudeControlSampler::new(imu.clone(), &config.gains).with_position(gps.clone());
        let control = Arc::new(DeviceTask::new(
            "control",
            config.control.frequency_hz,
            config.control.capacity,
            control_sampler,
        )?);

        Ok(Self {
            config,
            gps,
            imu,
            control,
            servers: Vec::new(),
            mixer: None,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        })
    }

    pub fn with_mixer(mut self, mixer: MotorMixer) -> Self {
        self.mixer = Some(mixer);
        self
    }

    pub fn gps(&self) -> &Arc<GpsTask> {
        &self.gps
    }

    pub fn imu(&self) -> &Arc<ImuTask> {
        &self.imu
    }

    pub fn control(&self) -> &Arc<ControlTask> {
        &self.control
    }

    /// Flag that ends the motor loop when set; safe to hand to another thread.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Bound server addresses in gps, imu, control order (empty before `start`).
    pub fn server_addrs(&self) -> Vec<SocketAddr> {
        self.servers.iter().map(|s| s.local_addr()).collect()
    }

    /// Binds the stream servers and starts every sampling and serving thread.
    pub fn start(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(FlightError::AlreadyRunning);
        }

        let endpoints: [(&TaskConfig, Arc<dyn SnapshotSource>); 3] = [
            (&self.config.gps, self.gps.clone()),
            (&self.config.imu, self.imu.clone()),
            (&self.config.control, self.control.clone()),
        ];
        let mut servers = Vec::with_capacity(endpoints.len());
        for (task_config, source) in endpoints {
            let addr = (self.config.host.as_str(), task_config.port);
            servers.push(Arc::new(StreamServer::bind(addr, source)?));
        }

        self.handles.push(("gps".to_string(), self.gps.spawn()?));
        self.handles.push(("imu".to_string(), self.imu.spawn()?));
        self.handles.push(("control".to_string(), self.control.spawn()?));
        for server in &servers {
            let name = format!("server {}", server.local_addr());
            self.handles.push((name, server.launch()?));
        }
        self.servers = servers;

        log::info!("[vehicle] started, streams on {:?}", self.server_addrs());
        Ok(())
    }

    /// Applies the latest control sample to the motors at the control frequency until the
    /// stop flag is set or `duration` has elapsed. In dry-run mode nothing is commanded.
    pub fn run_motor_loop(&mut self, duration: Option<Duration>) -> Result<()> {
        let period = self.control.period();
        let started = Instant::now();
        let mut cycles: u64 = 0;

        while !self.stop.load(Ordering::SeqCst) {
            if duration.is_some_and(|d| started.elapsed() >= d) {
                log::info!("[vehicle] duration reached");
                break;
            }

            if let Some(sample) = self.control.get_data()? {
                match self.mixer.as_mut() {
                    Some(mixer) if !self.config.dry_run => {
                        let commands = mixer.apply(&sample)?;
                        cycles += 1;
                        if cycles % 100 == 0 {
                            log::debug!("[vehicle] motor commands {:?}", commands);
                        }
                    }
                    _ => {}
                }
            }
            thread::sleep(period);
        }
        Ok(())
    }

    /// Stops every task and server, idles the motors and joins all threads.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.gps.shutdown();
        self.imu.shutdown();
        self.control.shutdown();
        for server in &self.servers {
            server.shutdown();
        }
        if let Some(mixer) = self.mixer.as_mut() {
            mixer.idle()?;
        }

        let mut first_error = None;
        for (name, handle) in self.handles.drain(..) {
            let outcome = handle
                .join()
                .map_err(|_| FlightError::Internal(format!("{} thread panicked", name)))
                .and_then(|result| result);
            if let Err(e) = outcome {
                log::error!("[vehicle] {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        log::info!("[vehicle] shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
