//! Safe Rust driver for the ST LSM6DSL IMU over SPI.
//!
//! This crate provides the hardware-facing half of the drivesense logger: a
//! register protocol over a byte transport, FIFO status and payload
//! decoding, and the data-ready line the acquisition loop polls.
//!
//! # Architecture
//!
//! ## Bus Access
//! - [`Transport`] - Raw full-duplex transfer (spidev on hardware)
//! - [`BusDevice`] - Register reads/writes, bulk reads, identity check
//!
//! ## Sensor
//! - [`Lsm6dsl`] - Detection, configuration, FIFO status and payload reads
//! - [`FifoStatus`] / [`Sample`] / [`decode_samples`] - FIFO interpretation
//!
//! ## Data Ready
//! - [`ReadyGate`] - Polled and blocking-wait ready condition
//!
//! ## Simulation
//! - [`mock::MockImu`] - Scriptable sensor used by tests and bench runs
//!
//! # Examples
//!
//! ```no_run
//! use daq_driver_lsm6dsl::{mock::MockImu, Lsm6dsl};
//!
//! # fn example() -> anyhow::Result<()> {
//! let imu = MockImu::new();
//! imu.push_samples(&[[1, 2, 3, 4, 5, 6]]);
//!
//! let mut device = Lsm6dsl::new(imu.transport());
//! device.open()?;
//! if device.detect_device()? {
//!     let status = device.read_status()?;
//!     let decoded = device.read_samples(status.word_count())?;
//!     for sample in &decoded.samples {
//!         print!("{}", sample.to_record());
//!     }
//! }
//! device.close();
//! # Ok(())
//! # }
//! ```
//!
//! With the `hardware` feature, [`bus::SpidevTransport`] and
//! [`ready::GpioReadyLine`] talk to a real sensor on a Raspberry Pi.

pub mod bus;
pub mod device;
pub mod error;
pub mod fifo;
pub mod mock;
pub mod ready;
pub mod registers;

pub use bus::{BusDevice, Transport};
pub use device::Lsm6dsl;
pub use error::{DriverError, Result};
pub use fifo::{
    decode_samples, scale_accel, DecodedPayload, FifoStatus, ProtocolAnomaly, Sample, CSV_HEADER,
    SAMPLE_BYTES,
};
pub use ready::ReadyGate;

#[cfg(feature = "hardware")]
pub use bus::SpidevTransport;
#[cfg(feature = "hardware")]
pub use ready::GpioReadyLine;
