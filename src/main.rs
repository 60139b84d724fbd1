//! CLI entry point for drivesense
//!
//! Provides command-line interface for:
//! - Recording a single session on the device (`run`)
//! - Button-driven recording, the mode the logger boots into (`daemon`)
//! - Exercising the full pipeline against a simulated IMU (`simulate`)
//! - Sending a single UBX command to the GPS receiver (`gps-command`)
//!
//! Session start and stop block on sensor settling and thread joins, so the
//! async commands run them under `block_in_place`.
//!
//! # Usage
//!
//! ```bash
//! drivesense run --duration 600
//! drivesense daemon --config /etc/drivesense/drivesense.toml
//! drivesense simulate --root /tmp/sensor_data --samples 5000
//! drivesense gps-command sleep
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use daq_driver_lsm6dsl::{mock::MockImu, Lsm6dsl};
use drivesense::{
    acquisition::{AcquisitionConfig, AcquisitionLoop, StartOutcome},
    config::{DaqConfig, DEFAULT_CONFIG_PATH},
    gps::{self, UbxCommand},
    logging,
    session::{next_trial_id, SessionConfig, SessionController},
    status::TracingStatus,
};
use tokio::task::block_in_place;
use tracing::info;

#[derive(Parser)]
#[command(name = "drivesense")]
#[command(about = "IMU/GPS data logger", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one session on the attached sensors
    Run {
        /// Session directory name (default: next trial-N)
        #[arg(long)]
        session: Option<String>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Start and stop sessions with the DAQ button
    Daemon,

    /// Run the pipeline against a simulated IMU
    Simulate {
        /// Session directory name (default: next trial-N)
        #[arg(long)]
        session: Option<String>,

        /// Number of samples to generate
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Override the storage root
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Send one UBX command to the GPS receiver
    GpsCommand {
        /// reset, rate-2, rate-5, rate-10, baud-9600, baud-115200, sleep, wake
        #[arg(value_name = "NAME")]
        command: UbxCommand,

        /// Receiver's current baud rate (default: gps.baud from the config)
        #[arg(long)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaqConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(
        name = %config.application.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting application"
    );

    match cli.command {
        Commands::Run { session, duration } => hardware::run(config, session, duration).await,
        Commands::Daemon => hardware::daemon(config).await,
        Commands::Simulate {
            session,
            samples,
            root,
        } => simulate(config, session, samples, root).await,
        Commands::GpsCommand { command, baud } => {
            let baud = baud.unwrap_or(config.gps.baud);
            gps::send_ubx(&config.gps.serial_port, baud, &[command])?;
            info!(?command, port = %config.gps.serial_port, baud, "Sent GPS command");
            Ok(())
        }
    }
}

async fn simulate(
    mut config: DaqConfig,
    session: Option<String>,
    samples: usize,
    root: Option<PathBuf>,
) -> Result<()> {
    if let Some(root) = root {
        config.storage.root = root;
    }
    let session_id = match session {
        Some(id) => id,
        None => next_trial_id(&config.storage.root)?,
    };

    let imu = MockImu::new();
    let device = Lsm6dsl::new(imu.transport()).with_reset_delay(Duration::ZERO);
    let acquisition_config = AcquisitionConfig {
        settle_delay: Duration::ZERO,
        ..AcquisitionConfig::from(&config.imu)
    };
    let acquisition = AcquisitionLoop::new(
        device,
        imu.ready_line(),
        acquisition_config,
        Arc::new(TracingStatus),
    );
    let mut controller = SessionController::new(SessionConfig::from(&config), acquisition);

    if block_in_place(|| controller.start_daq(&session_id))? == StartOutcome::DeviceNotDetected {
        bail!("Simulated IMU not detected");
    }

    // Feed the FIFO in bursts, roughly as the sensor fills it at 833 Hz.
    let feeder_imu = imu.clone();
    let feeder = thread::spawn(move || {
        for chunk_start in (0..samples).step_by(32) {
            let burst: Vec<[i16; 6]> = (chunk_start..samples.min(chunk_start + 32))
                .map(synthetic_sample)
                .collect();
            feeder_imu.push_samples(&burst);
            thread::sleep(Duration::from_millis(38));
        }
    });

    while !feeder.is_finished() || imu.fifo_len() > 0 {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    feeder
        .join()
        .map_err(|_| anyhow!("Sample feeder panicked"))?;

    if let Some(summary) = block_in_place(|| controller.stop_daq())? {
        info!(
            session = %summary.session_id,
            dir = %summary.dir.display(),
            samples = summary.loop_stats.samples,
            bytes = summary.writer.bytes,
            elapsed_s = summary.metadata.elapsed_time,
            "Simulated session complete"
        );
    }
    Ok(())
}

fn synthetic_sample(i: usize) -> [i16; 6] {
    let phase = i as f64 / 833.0 * std::f64::consts::TAU;
    [
        (phase.sin() * 300.0) as i16,
        (phase.cos() * 300.0) as i16,
        0,
        (phase.sin() * 100.0) as i16,
        0,
        2048,
    ]
}

#[cfg(feature = "hardware")]
mod hardware {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use daq_driver_lsm6dsl::{GpioReadyLine, Lsm6dsl, SpidevTransport};
    use drivesense::{
        acquisition::{AcquisitionConfig, AcquisitionLoop, StartOutcome},
        button::ButtonWatcher,
        config::DaqConfig,
        gps::{self, GpsdConnector},
        session::{next_trial_id, SessionConfig, SessionController},
        status::{Status, WatchStatus},
    };
    use tokio::sync::{mpsc, watch};
    use tokio::task::block_in_place;
    use tracing::{debug, error, info, warn};

    type Controller = SessionController<SpidevTransport, GpioReadyLine>;

    fn build(config: &DaqConfig) -> Result<(Controller, watch::Receiver<Status>)> {
        let transport = SpidevTransport::new(
            config.imu.spi_path.clone(),
            config.imu.max_speed_hz,
            config.imu.spi_mode,
        );
        let gate = GpioReadyLine::open(config.imu.ready_pin)?;
        let (status, status_rx) = WatchStatus::new();
        let acquisition = AcquisitionLoop::new(
            Lsm6dsl::new(transport),
            gate,
            AcquisitionConfig::from(&config.imu),
            Arc::new(status),
        );

        let mut controller = SessionController::new(SessionConfig::from(config), acquisition);
        if config.gps.enabled {
            if config.gps.configure_receiver {
                if let Err(e) = gps::configure_receiver(&config.gps) {
                    warn!(error = %e, "GPS receiver not configured");
                }
            }
            controller =
                controller.with_gps(Arc::new(GpsdConnector::new(config.gps.gpsd_addr.clone())));
        }
        Ok((controller, status_rx))
    }

    fn session_id(controller: &Controller, requested: Option<String>) -> Result<String> {
        Ok(match requested {
            Some(id) => id,
            None => next_trial_id(controller.root())?,
        })
    }

    pub async fn run(
        config: DaqConfig,
        session: Option<String>,
        duration: Option<u64>,
    ) -> Result<()> {
        let (mut controller, mut status_rx) = build(&config)?;
        let id = session_id(&controller, session)?;

        if block_in_place(|| controller.start_daq(&id))? == StartOutcome::DeviceNotDetected {
            bail!("IMU not detected on {}", config.imu.spi_path);
        }

        let deadline = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                _ = &mut deadline => {
                    info!("Duration elapsed");
                    break;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() || matches!(*status_rx.borrow(), Status::Fault(_)) {
                        break;
                    }
                }
            }
        }

        if let Some(summary) = block_in_place(|| controller.stop_daq())? {
            info!(
                session = %summary.session_id,
                samples = summary.loop_stats.samples,
                elapsed_s = summary.metadata.elapsed_time,
                "Session complete"
            );
        }
        Ok(())
    }

    pub async fn daemon(config: DaqConfig) -> Result<()> {
        let (mut controller, mut status_rx) = build(&config)?;
        let (tx, mut commands) = mpsc::unbounded_channel();
        let _button = ButtonWatcher::spawn(
            config.button.daq_pin,
            Duration::from_secs_f64(config.button.hold_secs),
            tx,
        )?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    debug!(?command, "Button command");
                    // Follow the real session state; a faulted session may
                    // have ended without a button press.
                    if controller.is_running() {
                        stop(&mut controller);
                    } else {
                        start(&mut controller);
                    }
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let faulted = matches!(*status_rx.borrow(), Status::Fault(_));
                    if faulted && controller.is_running() {
                        stop(&mut controller);
                    }
                }
            }
        }

        stop(&mut controller);
        Ok(())
    }

    fn start(controller: &mut Controller) {
        let id = match session_id(controller, None) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to name session");
                return;
            }
        };
        match block_in_place(|| controller.start_daq(&id)) {
            Ok(StartOutcome::Started) => {}
            Ok(StartOutcome::DeviceNotDetected) => warn!("IMU not detected, press again to retry"),
            Err(e) if e.can_recover() => {
                warn!(error = %e, "Session not started, press again to retry")
            }
            Err(e) => error!(error = %e, "Failed to start session"),
        }
    }

    fn stop(controller: &mut Controller) {
        match block_in_place(|| controller.stop_daq()) {
            Ok(Some(summary)) => info!(
                session = %summary.session_id,
                samples = summary.loop_stats.samples,
                "Session complete"
            ),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Session ended with error"),
        }
    }
}

#[cfg(not(feature = "hardware"))]
mod hardware {
    use anyhow::Result;
    use drivesense::{config::DaqConfig, DaqError};

    pub async fn run(_: DaqConfig, _: Option<String>, _: Option<u64>) -> Result<()> {
        Err(DaqError::FeatureNotEnabled("hardware".to_string()).into())
    }

    pub async fn daemon(_: DaqConfig) -> Result<()> {
        Err(DaqError::FeatureNotEnabled("hardware".to_string()).into())
    }
}
