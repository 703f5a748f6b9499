use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use autonomy_rs::sensors::mock::MockImu;
use autonomy_rs::sensors::ImuSampler;
use autonomy_rs::stream::{StreamClient, StreamServer};
use autonomy_rs::{DeviceTask, StationConfig};

/// Serve the IMU task on its own, or subscribe to a running one.
#[derive(Parser, Debug)]
#[command(name = "imu_stream")]
struct Args {
    /// Subscribe instead of serving
    #[arg(long)]
    client: bool,

    /// Push rate requested by the client (0 = single sample)
    #[arg(long)]
    frequency: Option<u32>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop the client after this many payloads (0 = until the server hangs up)
    #[arg(long, default_value = "0")]
    count: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = StationConfig::load_or_default(args.config.as_ref())
        .context("failed to load station configuration")?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.imu.port = port;
    }

    if args.client {
        let frequency = args.frequency.unwrap_or(config.client_frequency_hz);
        run_client(&config, frequency, args.count)
    } else {
        run_server(&config)
    }
}

fn run_server(config: &StationConfig) -> Result<()> {
    let sampler = ImuSampler::new(
        MockImu::new(),
        &config.fusion,
        &config.ewma,
        config.imu.frequency_hz,
    )
    .context("IMU not available")?;
    let task = Arc::new(DeviceTask::new(
        "imu",
        config.imu.frequency_hz,
        config.imu.capacity,
        sampler,
    )?);
    let server = StreamServer::bind((config.host.as_str(), config.imu.port), task.clone())
        .with_context(|| format!("cannot bind {}:{}", config.host, config.imu.port))?;
    let sampling = task.spawn()?;
    log::info!("[imu_stream] serving on {}", server.local_addr());

    let served = server.run();
    task.shutdown();
    sampling
        .join()
        .map_err(|_| anyhow::anyhow!("sampling thread panicked"))??;
    served?;
    Ok(())
}

fn run_client(config: &StationConfig, frequency: u32, count: u64) -> Result<()> {
    let mut client = StreamClient::connect((config.host.as_str(), config.imu.port), frequency)
        .context("cannot reach IMU stream")?;
    client.print_all(&mut std::io::stdout().lock(), count)?;
    Ok(())
}
