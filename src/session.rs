//! Session lifecycle: one bounded recording run in its own directory.
//!
//! [`SessionController::start_daq`] brings a session up in this order:
//!
//! 1. reject if a session is active or the directory already exists
//! 2. open, settle, detect and configure the IMU (a missing sensor ends the
//!    attempt here, before anything touches the filesystem)
//! 3. create `<root>/<session_id>/` and write the CSV header to `imu.dat`
//! 4. start the persistence writer, then the IMU producer
//! 5. optionally start the GPS recorder
//!
//! Any failure after step 3 removes the directory and releases the sensor,
//! so a failed start leaves nothing behind.
//!
//! [`SessionController::stop_daq`] stops the producer (which terminates the
//! queue), waits for the writer to drain and sync `imu.dat`, stops GPS, and
//! only then writes `imu.meta`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use daq_driver_lsm6dsl::{ReadyGate, Transport, CSV_HEADER};
use tracing::{error, info, warn};

use crate::acquisition::{AcquisitionLoop, LoopStats, StartOutcome};
use crate::config::DaqConfig;
use crate::error::{AppResult, DaqError};
use crate::gps::{FixMode, GpsConnect, GpsPoller};
use crate::metadata::{self, SessionClock, SessionMetadata, IMU_DATA_FILE, IMU_META_FILE};
use crate::queue::SampleQueue;
use crate::writer::{PersistenceWriter, WriterConfig, WriterReport};

/// Prefix of automatically numbered session directories.
pub const TRIAL_PREFIX: &str = "trial-";

/// Storage settings for sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding one subdirectory per session.
    pub root: PathBuf,
    /// Persistence writer tuning.
    pub writer: WriterConfig,
    /// Queue length above which backpressure is logged.
    pub queue_soft_capacity: usize,
}

impl From<&DaqConfig> for SessionConfig {
    fn from(config: &DaqConfig) -> Self {
        Self {
            root: config.storage.root.clone(),
            writer: WriterConfig {
                flush_threshold: config.storage.flush_threshold_bytes,
                pop_timeout: config.storage.pop_timeout(),
            },
            queue_soft_capacity: config.imu.queue_soft_capacity,
        }
    }
}

/// What a finished session produced.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Directory name of the session.
    pub session_id: String,
    /// Full session directory.
    pub dir: PathBuf,
    /// What was written to `imu.meta`.
    pub metadata: SessionMetadata,
    /// Producer counters.
    pub loop_stats: LoopStats,
    /// Writer counters.
    pub writer: WriterReport,
}

struct ActiveSession {
    id: String,
    dir: PathBuf,
    clock: SessionClock,
    writer: PersistenceWriter,
    gps: Option<GpsPoller>,
}

/// Starts and stops recording sessions. At most one session is active.
pub struct SessionController<T: Transport + 'static, G: ReadyGate + 'static> {
    config: SessionConfig,
    acquisition: AcquisitionLoop<T, G>,
    gps: Option<Arc<dyn GpsConnect>>,
    fix: FixMode,
    active: Option<ActiveSession>,
}

impl<T: Transport + 'static, G: ReadyGate + 'static> SessionController<T, G> {
    /// Idle controller around an acquisition loop.
    pub fn new(config: SessionConfig, acquisition: AcquisitionLoop<T, G>) -> Self {
        Self {
            config,
            acquisition,
            gps: None,
            fix: FixMode::default(),
            active: None,
        }
    }

    /// Record a GPS stream from `source` alongside every session.
    pub fn with_gps(mut self, source: Arc<dyn GpsConnect>) -> Self {
        self.gps = Some(source);
        self
    }

    /// Whether a session is active.
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the producer has ended on its own (bus fault) and the session
    /// is waiting for `stop_daq`.
    pub fn loop_finished(&self) -> bool {
        self.acquisition.loop_finished()
    }

    /// Latest GPS fix mode, 0 when unknown.
    pub fn fix_mode(&self) -> u8 {
        self.fix.get()
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Start a session named `session_id`.
    pub fn start_daq(&mut self, session_id: &str) -> AppResult<StartOutcome> {
        if self.active.is_some() {
            return Err(DaqError::AlreadyRunning);
        }
        validate_session_id(session_id)?;

        let dir = self.config.root.join(session_id);
        if dir.exists() {
            return Err(DaqError::SessionExists(dir));
        }

        if self.acquisition.prepare()? == StartOutcome::DeviceNotDetected {
            return Ok(StartOutcome::DeviceNotDetected);
        }

        match self.open_session(session_id, &dir) {
            Ok(session) => {
                info!(session = session_id, dir = %dir.display(), "Started DAQ session");
                self.active = Some(session);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.acquisition.abort();
                error!(session = session_id, error = %e, "Failed to start DAQ session");
                Err(e)
            }
        }
    }

    fn open_session(&mut self, session_id: &str, dir: &Path) -> AppResult<ActiveSession> {
        fs::create_dir_all(&self.config.root)?;
        fs::create_dir(dir).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => DaqError::SessionExists(dir.to_path_buf()),
            _ => DaqError::Io(e),
        })?;

        let result = self.start_streams(session_id, dir);
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to remove partial session");
            }
        }
        result
    }

    fn start_streams(&mut self, session_id: &str, dir: &Path) -> AppResult<ActiveSession> {
        let data_path = dir.join(IMU_DATA_FILE);
        fs::write(&data_path, CSV_HEADER)?;

        let (producer, consumer) = SampleQueue::channel(self.config.queue_soft_capacity);
        let writer = PersistenceWriter::spawn(&data_path, consumer, self.config.writer)?;
        let clock = SessionClock::start();
        // On failure the producer is dropped, which ends the writer's stream.
        self.acquisition.spawn(producer)?;

        let gps = self.gps.as_ref().and_then(|source| {
            let started = source
                .connect()
                .map_err(DaqError::from)
                .and_then(|stream| GpsPoller::start(dir, stream, self.fix.clone()));
            match started {
                Ok(poller) => Some(poller),
                Err(e) => {
                    warn!(error = %e, "GPS unavailable, recording IMU only");
                    None
                }
            }
        });

        Ok(ActiveSession {
            id: session_id.to_string(),
            dir: dir.to_path_buf(),
            clock,
            writer,
            gps,
        })
    }

    /// Stop the active session. No-op returning `Ok(None)` when idle.
    ///
    /// The session is always closed out (data drained, metadata written) even
    /// when the producer or writer failed; the failure is returned afterwards.
    pub fn stop_daq(&mut self) -> AppResult<Option<SessionSummary>> {
        let Some(session) = self.active.take() else {
            return Ok(None);
        };

        let polled = self.acquisition.stop_polling();
        let metadata = session.clock.finish();
        let written = session.writer.join();

        if let Some(gps) = session.gps {
            if let Err(e) = gps.stop() {
                warn!(error = %e, "Failed to stop GPS stream");
            }
        }

        let recorded = match (polled, written) {
            (Ok(stats), Ok(report)) => Ok((stats.unwrap_or_default(), report)),
            (Err(DaqError::QueueClosed), Err(e)) | (Ok(_), Err(e)) | (Err(e), _) => Err(e),
        };
        let meta_written = metadata::write_json_line(&session.dir.join(IMU_META_FILE), &metadata);
        info!(
            session = %session.id,
            elapsed_s = metadata.elapsed_time,
            "Stopped DAQ session"
        );

        // The fault that ended the session outranks a metadata write failure.
        let (loop_stats, writer) = match (recorded, meta_written) {
            (Ok(recorded), Ok(())) => recorded,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(meta_err)) => {
                error!(
                    session = %session.id,
                    error = %meta_err,
                    "Failed to write session metadata"
                );
                return Err(e);
            }
        };

        Ok(Some(SessionSummary {
            session_id: session.id,
            dir: session.dir,
            metadata,
            loop_stats,
            writer,
        }))
    }
}

impl<T: Transport + 'static, G: ReadyGate + 'static> Drop for SessionController<T, G> {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop_daq() {
                error!("Error stopping session on drop: {}", e);
            }
        }
    }
}

fn validate_session_id(session_id: &str) -> AppResult<()> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "Invalid session id '{}'",
            session_id
        )))
    }
}

/// Next `trial-N` name under `root`: one past the highest existing number.
///
/// Returns `trial-1` when `root` does not exist or holds no trials.
pub fn next_trial_id(root: &Path) -> io::Result<String> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(format!("{}1", TRIAL_PREFIX))
        }
        Err(e) => return Err(e),
    };

    let mut highest = 0u32;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let number = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_prefix(TRIAL_PREFIX))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = number {
            highest = highest.max(n);
        }
    }
    Ok(format!("{}{}", TRIAL_PREFIX, highest + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_trial_id_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_trial_id(dir.path()).unwrap(), "trial-1");
        assert_eq!(
            next_trial_id(&dir.path().join("missing")).unwrap(),
            "trial-1"
        );
    }

    #[test]
    fn test_next_trial_id_skips_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("trial-2")).unwrap();
        fs::create_dir(dir.path().join("trial-10")).unwrap();
        fs::create_dir(dir.path().join("trial-x")).unwrap();
        fs::create_dir(dir.path().join("calibration")).unwrap();
        fs::write(dir.path().join("trial-99"), "not a directory").unwrap();
        assert_eq!(next_trial_id(dir.path()).unwrap(), "trial-11");
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("trial-1").is_ok());
        assert!(validate_session_id("2024-06-01T10:00").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("a/b").is_err());
    }
}
