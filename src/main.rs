use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};

use autonomy_rs::actuators::{Actuator, EscMotor, MotorMixer, RecordingPulse, MOTOR_ORDER};
use autonomy_rs::sensors::calibration::calibrate;
use autonomy_rs::sensors::mock::{MockGps, MockImu};
use autonomy_rs::sensors::nmea::NmeaSource;
use autonomy_rs::sensors::{InertialSensor, PositionSource};
use autonomy_rs::{StationConfig, Vehicle};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImuKind {
    /// Simulated IMU with a slow wobble
    Mock,
    /// Simulated IMU lying still
    Level,
    /// No IMU attached
    None,
}

#[derive(Parser, Debug)]
#[command(name = "autonomy")]
#[command(about = "Flight station - GPS, IMU and attitude control tasks served over TCP", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON station configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the stream servers bind to
    #[arg(long)]
    host: Option<String>,

    /// Sample and serve, but never command the motors
    #[arg(long)]
    dry_run: bool,

    /// IMU backend
    #[arg(long, value_enum, default_value = "mock")]
    imu: ImuKind,

    /// NMEA device or log file; the simulated GPS is used when absent
    #[arg(long)]
    gps_device: Option<PathBuf>,

    /// Stationary samples to collect for a bias report before starting (0 = skip)
    #[arg(long, default_value = "0")]
    calibrate: usize,

    /// Initial attitude reference as yaw,pitch,roll in radians
    #[arg(long, value_delimiter = ',', num_args = 3)]
    reference: Option<Vec<f64>>,

    /// Initial altitude reference in metres
    #[arg(long, default_value = "0")]
    altitude: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = StationConfig::load_or_default(args.config.as_ref())
        .context("failed to load station configuration")?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    config.dry_run |= args.dry_run;

    log::info!("[{}] Autonomy starting", ts_now());
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Host: {}", config.host);
    log::info!(
        "  Ports: gps {} imu {} control {}",
        config.gps.port,
        config.imu.port,
        config.control.port
    );
    log::info!("  Dry run: {}", config.dry_run);

    let mut imu: Box<dyn InertialSensor> = match args.imu {
        ImuKind::Mock => Box::new(MockImu::new()),
        ImuKind::Level => Box::new(MockImu::level()),
        ImuKind::None => Box::new(MockImu::absent()),
    };

    if args.calibrate > 0 {
        let stats = calibrate(&mut imu, args.calibrate).context("calibration failed")?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    let gps: Box<dyn PositionSource> = match &args.gps_device {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open GPS device {}", path.display()))?;
            Box::new(NmeaSource::new(BufReader::new(file)))
        }
        None => Box::new(MockGps::new()),
    };

    let mut vehicle = Vehicle::new(config.clone(), imu, gps).context("failed to build vehicle")?;

    if !config.dry_run {
        vehicle = vehicle.with_mixer(build_mixer()?);
    }

    if let Some(reference) = &args.reference {
        vehicle
            .control()
            .set_reference(reference[0], reference[1], reference[2], args.altitude)?;
    } else if args.altitude != 0.0 {
        vehicle.control().set_reference(0.0, 0.0, 0.0, args.altitude)?;
    }

    vehicle.start().context("failed to start tasks")?;

    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let outcome = vehicle.run_motor_loop(duration);

    log::info!("[{}] Stopping...", ts_now());
    log::info!(
        "  Samples: gps {} imu {} control {}",
        vehicle.gps().samples_taken(),
        vehicle.imu().samples_taken(),
        vehicle.control().samples_taken()
    );
    vehicle.shutdown().context("shutdown failed")?;
    outcome.context("motor loop failed")?;
    Ok(())
}

/// Four armed ESCs behind recording pulse outputs, in mixer order.
fn build_mixer() -> Result<MotorMixer> {
    let motors = MOTOR_ORDER.map(|position| {
        let name = format!("{:?}", position).to_lowercase();
        EscMotor::new(&name, RecordingPulse::new())
    });
    let mut armed: Vec<Box<dyn Actuator>> = Vec::with_capacity(motors.len());
    for mut motor in motors {
        motor.arm()?;
        armed.push(Box::new(motor));
    }
    let motors: [Box<dyn Actuator>; 4] = armed
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected four motors"))?;
    Ok(MotorMixer::new(0.0, motors)?)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
