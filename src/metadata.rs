//! Per-session metadata files.
//!
//! Each stream writes one JSON object on a single line when it stops:
//! `imu.meta` for the IMU and `gps.meta` for the GPS stream.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Name of the IMU data file inside a session directory.
pub const IMU_DATA_FILE: &str = "imu.dat";
/// Name of the IMU metadata file inside a session directory.
pub const IMU_META_FILE: &str = "imu.meta";
/// Name of the GPS data file inside a session directory.
pub const GPS_DATA_FILE: &str = "gps.dat";
/// Name of the GPS metadata file inside a session directory.
pub const GPS_META_FILE: &str = "gps.meta";

/// Contents of `imu.meta`.
///
/// `start_time` and `stop_time` are wall-clock UNIX seconds for correlating
/// with other recordings; `elapsed_time` is measured on the monotonic clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    /// UNIX seconds at start.
    pub start_time: f64,
    /// UNIX seconds at stop.
    pub stop_time: f64,
    /// Seconds between start and stop.
    pub elapsed_time: f64,
}

/// Contents of `gps.meta`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GpsMetadata {
    /// UNIX seconds when recording started.
    pub start_time: f64,
    /// UNIX seconds when recording stopped.
    pub stop_time: f64,
}

/// Start marks for a running stream.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SessionClock {
    /// Record the start of a stream now.
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Monotonic time since start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wall-clock start in UNIX seconds.
    pub fn start_time(&self) -> f64 {
        unix_seconds(self.started_at)
    }

    /// Close the clock and produce the IMU metadata record.
    pub fn finish(&self) -> SessionMetadata {
        SessionMetadata {
            start_time: self.start_time(),
            stop_time: unix_seconds(Utc::now()),
            elapsed_time: self.elapsed().as_secs_f64(),
        }
    }
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1e6
}

/// Current wall-clock time in UNIX seconds.
pub fn now_unix_seconds() -> f64 {
    unix_seconds(Utc::now())
}

/// Write `value` as one JSON line, replacing any existing file.
pub fn write_json_line<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    fs::write(path, line)?;
    Ok(())
}
