//! Tracing setup for the logger binaries.
//!
//! Console output goes to stderr in one of three formats. When a log directory
//! is configured, every process run also gets its own numbered file in that
//! directory (`1.log`, `2.log`, ...) so runs on the device can be told apart
//! after the fact.
//!
//! # Example
//! ```no_run
//! use drivesense::{config::DaqConfig, logging};
//! use tracing::{info, warn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaqConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!("Logger started");
//! warn!(pin = 24, "Ready line idle");
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::DaqConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    Pretty,
    /// Single line per event (on-device default)
    Compact,
    /// One JSON object per event
    Json,
}

impl OutputFormat {
    /// Parse a format name as used in the configuration file.
    pub fn parse(name: &str) -> Result<Self, String> {
        match name.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                name
            )),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Console output format
    pub format: OutputFormat,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (Pretty only)
    pub with_ansi: bool,
    /// Directory for numbered per-run log files
    pub log_dir: Option<PathBuf>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_thread_names: true,
            with_ansi: true,
            log_dir: None,
        }
    }
}

impl TracingConfig {
    /// Build from the application section of the logger configuration.
    pub fn from_daq_config(config: &DaqConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: OutputFormat::parse(&config.application.log_format)?,
            log_dir: config.application.log_dir.clone(),
            ..Default::default()
        })
    }
}

/// Initialize tracing from the logger configuration.
pub fn init_from_config(config: &DaqConfig) -> Result<(), String> {
    init(TracingConfig::from_daq_config(config)?)
}

/// Initialize tracing with custom configuration.
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which keeps it safe to call from tests.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let mut layers: Vec<BoxedLayer> = vec![console_layer(&config)];

    if let Some(dir) = &config.log_dir {
        let path = next_log_file(dir)
            .map_err(|e| format!("Failed to prepare log directory {}: {}", dir.display(), e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
        layers.push(file_layer(file, config.format));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .or_else(|e| {
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

fn console_layer(config: &TracingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(config.with_thread_names);
    match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    }
}

fn file_layer(file: File, format: OutputFormat) -> BoxedLayer {
    let base = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true);
    match format {
        OutputFormat::Json => base.json().boxed(),
        OutputFormat::Pretty | OutputFormat::Compact => base.compact().boxed(),
    }
}

/// Path of the next numbered log file in `dir`, creating `dir` if needed.
///
/// Files are named `<n>.log`; the next one is one past the highest existing
/// number. Anything else in the directory is ignored.
pub fn next_log_file(dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let mut highest = 0u32;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let number = name
            .to_str()
            .and_then(|n| n.strip_suffix(".log"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = number {
            highest = highest.max(n);
        }
    }
    Ok(dir.join(format!("{}.log", highest + 1)))
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("Pretty").unwrap(), OutputFormat::Pretty);
        assert!(OutputFormat::parse("xml").is_err());
    }

    #[test]
    fn test_config_from_daq_config() {
        let mut daq = DaqConfig::default();
        daq.application.log_level = "debug".to_string();
        daq.application.log_format = "json".to_string();
        daq.application.log_dir = Some(PathBuf::from("/var/log/drivesense"));

        let config = TracingConfig::from_daq_config(&daq).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/drivesense")));
    }

    #[test]
    fn test_next_log_file_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        assert_eq!(next_log_file(&logs).unwrap(), logs.join("1.log"));

        fs::write(logs.join("1.log"), "").unwrap();
        fs::write(logs.join("7.log"), "").unwrap();
        fs::write(logs.join("notes.txt"), "").unwrap();
        fs::write(logs.join("x.log"), "").unwrap();
        assert_eq!(next_log_file(&logs).unwrap(), logs.join("8.log"));
    }
}
