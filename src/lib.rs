//! # DriveSense
//!
//! Vehicle data logger for a Raspberry Pi: an LSM6DSL IMU sampled through its
//! hardware FIFO, an optional GPS stream from gpsd, and a long-press button
//! that starts and stops recording sessions.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The IMU producer. Detects and configures the sensor,
//!   then polls the data-ready line and turns FIFO payloads into records.
//! - **`queue`**: Non-blocking producer/consumer queue with an explicit end
//!   of stream.
//! - **`writer`**: Background writer that batches records into `imu.dat`.
//! - **`session`**: `SessionController`, which orders directory creation,
//!   writer and producer startup, and metadata capture.
//! - **`metadata`**: `imu.meta` / `gps.meta` records and file names.
//! - **`gps`**: gpsd recorder and UBX receiver configuration.
//! - **`button`**: Long-press start/stop detection.
//! - **`status`**: Status notifications for the display.
//! - **`config`**: Figment-based configuration.
//! - **`logging`**: Tracing subscriber setup.
//! - **`error`**: `DaqError` and `AppResult`.
//!
//! The sensor itself lives in the `daq-driver-lsm6dsl` crate.

pub mod acquisition;
pub mod button;
pub mod config;
pub mod error;
pub mod gps;
pub mod logging;
pub mod metadata;
pub mod queue;
pub mod session;
pub mod status;
pub mod writer;

pub use acquisition::{AcquisitionConfig, AcquisitionLoop, LoopState, StartOutcome};
pub use error::{AppResult, DaqError};
pub use session::{next_trial_id, SessionConfig, SessionController, SessionSummary};
