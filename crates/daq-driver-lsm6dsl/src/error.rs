//! Error types for LSM6DSL bus and ready-line operations.
//!
//! Device detection is deliberately absent here: an identity mismatch is a
//! normal answer from [`crate::Lsm6dsl::detect_device`], not an error.

use std::io;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur when talking to the IMU.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The bus device could not be claimed or configured.
    #[error("Bus '{path}' unavailable: {message}")]
    BusUnavailable {
        /// Device node, e.g. `/dev/spidev0.0`.
        path: String,
        /// Why the claim failed.
        message: String,
    },

    /// A transaction failed at the transport level.
    #[error("Bus I/O error during {operation}: {source}")]
    BusIo {
        /// Transaction that failed.
        operation: &'static str,
        /// Transport error.
        #[source]
        source: io::Error,
    },

    /// The transport returned fewer bytes than were clocked out.
    #[error("Short transfer during {operation}: sent {sent} bytes, received {received}")]
    ShortTransfer {
        /// Transaction that came back short.
        operation: &'static str,
        /// Bytes clocked out.
        sent: usize,
        /// Bytes returned.
        received: usize,
    },

    /// A transaction was attempted before `open()` or after `close()`.
    #[error("Bus is not open")]
    NotOpen,

    /// The data-ready line could not be claimed or read.
    #[error("Ready line {pin}: {message}")]
    ReadyLine {
        /// BCM pin number.
        pin: u8,
        /// Underlying GPIO error.
        message: String,
    },
}

impl DriverError {
    pub(crate) fn bus_io(operation: &'static str, source: io::Error) -> Self {
        Self::BusIo { operation, source }
    }

    /// Check if this is a mid-session transport fault.
    ///
    /// These end the current session; they are never retried by the loop.
    pub fn is_bus_io(&self) -> bool {
        matches!(
            self,
            Self::BusIo { .. } | Self::ShortTransfer { .. } | Self::NotOpen
        )
    }

    /// Check if the bus could not be claimed at startup.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BusUnavailable { .. })
    }
}
