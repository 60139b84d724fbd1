//! Background writer that drains the sample queue into the session data file.
//!
//! Records are collected in memory and written in batches: once the buffer
//! grows past the flush threshold it is written and flushed. End of stream
//! triggers the final write, flush and `fsync`, after which the thread exits.
//! A pop timeout is not an event; the writer simply polls again.
//!
//! The writer owns a dedicated thread running a current-thread tokio runtime,
//! so the async queue consumer can be awaited without tying file I/O to the
//! caller's runtime.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info};

use crate::error::{AppResult, DaqError};
use crate::queue::{Popped, QueueConsumer};

/// Writer tuning.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Buffered bytes above which the buffer is written and flushed.
    pub flush_threshold: usize,
    /// How long a single pop waits for a record.
    pub pop_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 4096,
            pop_timeout: Duration::from_millis(250),
        }
    }
}

/// Totals for one writer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Records drained from the queue.
    pub records: u64,
    /// Bytes written to the data file.
    pub bytes: u64,
    /// Write-and-flush cycles, the final one included.
    pub flushes: u64,
}

/// Handle to a running writer thread.
pub struct PersistenceWriter {
    path: PathBuf,
    handle: Option<JoinHandle<io::Result<WriterReport>>>,
}

impl PersistenceWriter {
    /// Open `path` for appending and start draining `consumer` into it.
    ///
    /// The file and the writer's runtime are set up on the calling thread so
    /// that either failing fails the session start instead of the writer
    /// thread.
    pub fn spawn(path: &Path, consumer: QueueConsumer, config: WriterConfig) -> AppResult<Self> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let runtime = Builder::new_current_thread().enable_time().build()?;

        let handle = thread::Builder::new()
            .name("imu-writer".to_string())
            .spawn(move || write_session(&runtime, file, consumer, config))?;

        debug!(path = %path.display(), "Started persistence writer");
        Ok(Self {
            path: path.to_path_buf(),
            handle: Some(handle),
        })
    }

    /// Wait for the writer to drain and close the file.
    ///
    /// Returns once end of stream has been written and synced, or the writer
    /// failed.
    pub fn join(mut self) -> AppResult<WriterReport> {
        let handle = self
            .handle
            .take()
            .ok_or(DaqError::ThreadPanicked("writer"))?;
        let report = handle
            .join()
            .map_err(|_| DaqError::ThreadPanicked("writer"))?
            .map_err(DaqError::WriterFailed)?;

        info!(
            path = %self.path.display(),
            records = report.records,
            bytes = report.bytes,
            flushes = report.flushes,
            "Persistence writer finished"
        );
        Ok(report)
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(path = %self.path.display(), "Writer thread panicked");
            }
        }
    }
}

fn write_session(
    runtime: &Runtime,
    mut file: File,
    mut consumer: QueueConsumer,
    config: WriterConfig,
) -> io::Result<WriterReport> {
    let result = runtime
        .block_on(drain(&mut file, &mut consumer, config))
        .and_then(|report| {
            file.sync_all()?;
            Ok(report)
        });
    if let Err(e) = &result {
        error!(error = %e, "Persistence writer failed");
    }
    result
}

/// Drain `consumer` into `out` until end of stream.
pub async fn drain<W: Write>(
    out: &mut W,
    consumer: &mut QueueConsumer,
    config: WriterConfig,
) -> io::Result<WriterReport> {
    let mut report = WriterReport::default();
    let mut buffer: Vec<u8> = Vec::with_capacity(config.flush_threshold * 2);

    loop {
        match consumer.pop(config.pop_timeout).await {
            Popped::Record(record) => {
                report.records += 1;
                buffer.extend_from_slice(&record);
                if buffer.len() > config.flush_threshold {
                    flush_buffer(out, &mut buffer, &mut report)?;
                }
            }
            Popped::Empty => continue,
            Popped::EndOfStream => {
                flush_buffer(out, &mut buffer, &mut report)?;
                return Ok(report);
            }
        }
    }
}

fn flush_buffer<W: Write>(
    out: &mut W,
    buffer: &mut Vec<u8>,
    report: &mut WriterReport,
) -> io::Result<()> {
    out.write_all(buffer)?;
    out.flush()?;
    report.bytes += buffer.len() as u64;
    report.flushes += 1;
    buffer.clear();
    Ok(())
}
