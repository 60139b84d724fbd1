//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/drivesense.toml`), if present
//! 2. environment variables prefixed with `DRIVESENSE_`, with `__` separating
//!    nested keys (e.g. `DRIVESENSE_STORAGE__ROOT=/mnt/data`)
//!
//! Every field has a default, so an empty configuration describes the stock
//! logger: LSM6DSL on `/dev/spidev0.0`, data-ready on BCM 24, data under
//! `/sensor_data`.
//!
//! # Example
//! ```no_run
//! use drivesense::config::DaqConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Storing sessions under {}", config.storage.root.display());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/drivesense.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Session storage settings
    pub storage: StorageConfig,
    /// IMU bus and acquisition settings
    pub imu: ImuConfig,
    /// GPS stream settings
    pub gps: GpsConfig,
    /// Start/stop button settings
    pub button: ButtonConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Directory for numbered log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "DriveSense".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            log_dir: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per session
    pub root: PathBuf,
    /// Buffered bytes that trigger a write + flush
    pub flush_threshold_bytes: usize,
    /// Writer wait on an empty queue before re-polling, in milliseconds
    pub pop_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sensor_data"),
            flush_threshold_bytes: 4096,
            pop_timeout_ms: 250,
        }
    }
}

impl StorageConfig {
    /// Writer pop timeout.
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

/// How the acquisition loop waits for data-ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyMode {
    /// Busy-poll the line level. Lowest latency, one core at 100%.
    #[default]
    Poll,
    /// Block on a rising edge with a timeout.
    Wait,
}

/// IMU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// spidev device node
    pub spi_path: String,
    /// SPI clock in Hz
    pub max_speed_hz: u32,
    /// SPI mode (0-3)
    pub spi_mode: u8,
    /// BCM pin wired to the sensor's INT2 (data ready)
    pub ready_pin: u8,
    /// Delay between opening the bus and the identity check, in milliseconds
    pub settle_delay_ms: u64,
    /// Ready-line strategy
    pub ready_mode: ReadyMode,
    /// Edge wait timeout in `wait` mode, in milliseconds
    pub wait_timeout_ms: u64,
    /// Queue length above which the producer logs backpressure warnings
    pub queue_soft_capacity: usize,
    /// Drain only whole samples from the FIFO, leaving a partial one queued
    pub whole_records_only: bool,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            spi_path: "/dev/spidev0.0".to_string(),
            max_speed_hz: 10_000_000,
            spi_mode: 3,
            ready_pin: 24,
            settle_delay_ms: 1000,
            ready_mode: ReadyMode::Poll,
            wait_timeout_ms: 50,
            queue_soft_capacity: 65_536,
            whole_records_only: true,
        }
    }
}

/// GPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Record a GPS stream alongside the IMU
    pub enabled: bool,
    /// gpsd address
    pub gpsd_addr: String,
    /// Receiver UART, used for UBX configuration
    pub serial_port: String,
    /// Send rate/baud configuration before the first session
    pub configure_receiver: bool,
    /// Navigation rate in Hz (2, 5 or 10)
    pub rate_hz: u8,
    /// Receiver baud rate after configuration (9600 or 115200)
    pub baud: u32,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpsd_addr: "127.0.0.1:2947".to_string(),
            serial_port: "/dev/serial0".to_string(),
            configure_receiver: true,
            rate_hz: 10,
            baud: 115_200,
        }
    }
}

/// Button configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// BCM pin of the start/stop button
    pub daq_pin: u8,
    /// Seconds the button must be held to toggle acquisition
    pub hold_secs: f64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            daq_pin: 16,
            hold_secs: 3.0,
        }
    }
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path.as_ref()).extract().map_err(DaqError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DRIVESENSE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.storage.flush_threshold_bytes == 0 {
            return Err(DaqError::Configuration(
                "flush_threshold_bytes must be greater than 0".to_string(),
            ));
        }

        if self.imu.spi_mode > 3 {
            return Err(DaqError::Configuration(format!(
                "Invalid spi_mode {}. Must be 0-3",
                self.imu.spi_mode
            )));
        }

        if self.imu.max_speed_hz == 0 {
            return Err(DaqError::Configuration(
                "max_speed_hz must be greater than 0".to_string(),
            ));
        }

        if ![2, 5, 10].contains(&self.gps.rate_hz) {
            return Err(DaqError::Configuration(format!(
                "Invalid GPS rate_hz {}. Must be 2, 5 or 10",
                self.gps.rate_hz
            )));
        }

        if ![9600, 115_200].contains(&self.gps.baud) {
            return Err(DaqError::Configuration(format!(
                "Invalid GPS baud {}. Must be 9600 or 115200",
                self.gps.baud
            )));
        }

        if !(self.button.hold_secs.is_finite() && self.button.hold_secs > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid button hold_secs {}",
                self.button.hold_secs
            )));
        }

        Ok(())
    }
}
