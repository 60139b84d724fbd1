//! Status notifications for the display collaborator.
//!
//! The acquisition pipeline reports lifecycle changes through a [`StatusSink`].
//! Whatever renders them (a small OLED on the device, a log line on the
//! bench) lives outside this crate.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

/// Lifecycle status of the IMU pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    /// No session active.
    #[default]
    Idle,
    /// Bus opened, waiting out the settle delay and reading WHO_AM_I.
    Detecting,
    /// Producer and writer running.
    Running,
    /// Session ended normally.
    Stopped,
    /// Identity check failed; nothing was started.
    DeviceNotDetected,
    /// Session ended by an error.
    Fault(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Detecting => write!(f, "detecting"),
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
            Status::DeviceNotDetected => write!(f, "device not detected"),
            Status::Fault(reason) => write!(f, "fault: {}", reason),
        }
    }
}

/// Receiver of status notifications. Called from the producer thread as well
/// as the controlling thread.
pub trait StatusSink: Send + Sync {
    /// Report a status change.
    fn notify(&self, status: Status);
}

/// Logs every status change.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn notify(&self, status: Status) {
        match &status {
            Status::Fault(reason) => error!(%reason, "IMU status: fault"),
            Status::DeviceNotDetected => warn!("IMU status: {}", status),
            _ => info!("IMU status: {}", status),
        }
    }
}

/// Publishes the latest status on a `tokio::sync::watch` channel.
#[derive(Debug, Clone)]
pub struct WatchStatus {
    tx: Arc<watch::Sender<Status>>,
}

impl WatchStatus {
    /// Sink plus a receiver starting at [`Status::Idle`].
    pub fn new() -> (Self, watch::Receiver<Status>) {
        let (tx, rx) = watch::channel(Status::Idle);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Latest published status.
    pub fn current(&self) -> Status {
        self.tx.borrow().clone()
    }
}

impl StatusSink for WatchStatus {
    fn notify(&self, status: Status) {
        TracingStatus.notify(status.clone());
        self.tx.send_replace(status);
    }
}
