//! Custom error types for the application.
//!
//! `DaqError` is the primary error type for session control, storage and
//! configuration. Using `thiserror`, lower-level failures convert into it with
//! `?`:
//!
//! - **`Driver`**: wraps [`DriverError`] from the IMU driver. Bus claim
//!   failures surface here at startup; mid-session transport faults surface
//!   here when the session is stopped.
//! - **`Io`**: filesystem failures while creating the session directory,
//!   writing the header, or persisting metadata.
//! - **`Config`** / **`Configuration`**: parse errors and semantic validation
//!   errors respectively.
//! - **`AlreadyRunning`** / **`SessionExists`**: caller misuse, rejected
//!   without side effects.
//!
//! "Device not detected" is intentionally not an error; see
//! [`crate::acquisition::StartOutcome`].

use daq_driver_lsm6dsl::DriverError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// IMU bus or ready-line failure.
    #[error("IMU error: {0}")]
    Driver(#[from] DriverError),

    /// Metadata could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A session is already active.
    #[error("A session is already running")]
    AlreadyRunning,

    /// The session directory exists and is never reused.
    #[error("Session directory '{}' already exists", .0.display())]
    SessionExists(PathBuf),

    /// The persistence writer failed while writing the data file.
    #[error("Data writer failed: {0}")]
    WriterFailed(std::io::Error),

    /// The consumer side of the sample queue is gone.
    #[error("Sample queue closed by the writer")]
    QueueClosed,

    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    /// The operation needs a cargo feature this build lacks.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the caller may simply retry the operation.
    pub fn can_recover(&self) -> bool {
        match self {
            DaqError::AlreadyRunning | DaqError::SessionExists(_) => true,
            DaqError::Driver(err) => !err.is_unavailable(),
            _ => false,
        }
    }
}
