//! Register-addressed bus access.
//!
//! [`Transport`] is the raw full-duplex exchange (`transfer(out) -> in`, equal
//! lengths, first byte of a read is an echo). [`BusDevice`] layers the
//! register protocol on top of it: single-byte reads and writes, bulk reads,
//! and the identity check.

use std::io;

use tracing::{debug, trace};

use crate::error::{DriverError, Result};
use crate::registers::READ_FLAG;

/// Raw bus transport.
///
/// Implementations own the OS handle. `open` claims it and applies clock
/// speed and mode; `close` releases it and must be safe to call twice.
pub trait Transport: Send {
    /// Claim the bus. Fails with [`DriverError::BusUnavailable`].
    fn open(&mut self) -> Result<()>;

    /// Clock `tx` out and return the bytes clocked in.
    fn transfer(&mut self, tx: &[u8]) -> io::Result<Vec<u8>>;

    /// Release the bus.
    fn close(&mut self);

    /// Human readable name of the underlying device, for logs.
    fn describe(&self) -> String;
}

/// A register-addressable peripheral on a [`Transport`].
pub struct BusDevice<T: Transport> {
    transport: T,
    open: bool,
}

impl<T: Transport> BusDevice<T> {
    /// Wrap a transport. Nothing is claimed until [`BusDevice::open`].
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            open: false,
        }
    }

    /// Claim the bus.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.transport.open()?;
        self.open = true;
        debug!(bus = %self.transport.describe(), "Opened bus");
        Ok(())
    }

    /// Whether the bus is currently claimed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Read one register.
    pub fn read_register(&mut self, addr: u8) -> Result<u8> {
        let rx = self.exchange("register read", &[addr | READ_FLAG, 0x00])?;
        Ok(rx[1])
    }

    /// Write one register.
    pub fn write_register(&mut self, addr: u8, value: u8) -> Result<()> {
        self.exchange("register write", &[addr & !READ_FLAG, value])?;
        trace!(addr, value, "Wrote register");
        Ok(())
    }

    /// Read `n_bytes` starting at `addr` in a single transaction.
    ///
    /// The transaction is `n_bytes + 1` long; the echo byte is discarded.
    pub fn bulk_read(&mut self, addr: u8, n_bytes: usize) -> Result<Vec<u8>> {
        let mut tx = vec![0u8; n_bytes + 1];
        tx[0] = addr | READ_FLAG;
        let mut rx = self.exchange("bulk read", &tx)?;
        rx.remove(0);
        Ok(rx)
    }

    /// Compare an identity register against its expected value.
    ///
    /// A successful read with the wrong value is `Ok(false)`; only a
    /// transport fault is an error.
    pub fn detect_device(&mut self, id_register: u8, expected: u8) -> Result<bool> {
        let found = self.read_register(id_register)?;
        if found == expected {
            debug!(found = format_args!("{found:#04x}"), "Device identity matched");
            Ok(true)
        } else {
            debug!(
                found = format_args!("{found:#04x}"),
                expected = format_args!("{expected:#04x}"),
                "Device identity mismatch"
            );
            Ok(false)
        }
    }

    /// Release the bus. Idempotent.
    pub fn close(&mut self) {
        if self.open {
            self.transport.close();
            self.open = false;
            debug!(bus = %self.transport.describe(), "Closed bus");
        }
    }

    fn exchange(&mut self, operation: &'static str, tx: &[u8]) -> Result<Vec<u8>> {
        if !self.open {
            return Err(DriverError::NotOpen);
        }
        let rx = self
            .transport
            .transfer(tx)
            .map_err(|e| DriverError::bus_io(operation, e))?;
        if rx.len() != tx.len() {
            return Err(DriverError::ShortTransfer {
                operation,
                sent: tx.len(),
                received: rx.len(),
            });
        }
        Ok(rx)
    }
}

impl<T: Transport> Drop for BusDevice<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Linux spidev transport.
#[cfg(feature = "hardware")]
pub struct SpidevTransport {
    path: String,
    max_speed_hz: u32,
    mode: u8,
    spi: Option<spidev::Spidev>,
}

#[cfg(feature = "hardware")]
impl SpidevTransport {
    /// Create a transport for `path` (e.g. `/dev/spidev0.0`).
    ///
    /// `mode` is the SPI mode number 0..=3; the LSM6DSL uses mode 3.
    pub fn new(path: impl Into<String>, max_speed_hz: u32, mode: u8) -> Self {
        Self {
            path: path.into(),
            max_speed_hz,
            mode,
            spi: None,
        }
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> DriverError {
        DriverError::BusUnavailable {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "hardware")]
impl Transport for SpidevTransport {
    fn open(&mut self) -> Result<()> {
        use spidev::{SpiModeFlags, Spidev, SpidevOptions};

        let mode = match self.mode {
            0 => SpiModeFlags::SPI_MODE_0,
            1 => SpiModeFlags::SPI_MODE_1,
            2 => SpiModeFlags::SPI_MODE_2,
            3 => SpiModeFlags::SPI_MODE_3,
            other => return Err(self.unavailable(format!("invalid SPI mode {other}"))),
        };

        let mut spi = Spidev::open(&self.path).map_err(|e| self.unavailable(e))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(self.max_speed_hz)
            .mode(mode)
            .build();
        spi.configure(&options).map_err(|e| self.unavailable(e))?;
        self.spi = Some(spi);
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8]) -> io::Result<Vec<u8>> {
        use spidev::SpidevTransfer;

        let spi = self
            .spi
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "spidev not open"))?;
        let mut rx = vec![0u8; tx.len()];
        {
            let mut transfer = SpidevTransfer::read_write(tx, &mut rx);
            spi.transfer(&mut transfer)?;
        }
        Ok(rx)
    }

    fn close(&mut self) {
        self.spi = None;
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// Transport that records every outgoing frame and answers with a fixed
    /// byte pattern.
    struct Recorder {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fill: u8,
        fail: bool,
        short: bool,
    }

    impl Recorder {
        fn new(fill: u8) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    sent: Arc::clone(&sent),
                    fill,
                    fail: false,
                    short: false,
                },
                sent,
            )
        }
    }

    impl Transport for Recorder {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn transfer(&mut self, tx: &[u8]) -> io::Result<Vec<u8>> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "bus stuck"));
            }
            self.sent.lock().push(tx.to_vec());
            let len = if self.short { 1 } else { tx.len() };
            let mut rx = vec![self.fill; len];
            rx[0] = 0xEE;
            Ok(rx)
        }

        fn close(&mut self) {}

        fn describe(&self) -> String {
            "recorder".to_string()
        }
    }

    #[test]
    fn test_read_sets_high_bit() {
        let (transport, sent) = Recorder::new(0x6A);
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        assert_eq!(bus.read_register(0x0F).unwrap(), 0x6A);
        assert_eq!(sent.lock()[0], vec![0x8F, 0x00]);
    }

    #[test]
    fn test_write_clears_high_bit() {
        let (transport, sent) = Recorder::new(0);
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        bus.write_register(0x90, 0x77).unwrap();
        assert_eq!(sent.lock()[0], vec![0x10, 0x77]);
    }

    #[test]
    fn test_bulk_read_discards_echo() {
        let (transport, sent) = Recorder::new(0x42);
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        let data = bus.bulk_read(0x3E, 12).unwrap();
        assert_eq!(data, vec![0x42; 12]);

        let frame = &sent.lock()[0];
        assert_eq!(frame.len(), 13);
        assert_eq!(frame[0], 0xBE);
    }

    #[test]
    fn test_detect_mismatch_is_not_an_error() {
        let (transport, _) = Recorder::new(0x69);
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        assert!(!bus.detect_device(0x0F, 0x6A).unwrap());
    }

    #[test]
    fn test_detect_transport_fault_is_an_error() {
        let (mut transport, _) = Recorder::new(0x6A);
        transport.fail = true;
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        let err = bus.detect_device(0x0F, 0x6A).unwrap_err();
        assert!(err.is_bus_io());
    }

    #[test]
    fn test_short_transfer_rejected() {
        let (mut transport, _) = Recorder::new(0);
        transport.short = true;
        let mut bus = BusDevice::new(transport);
        bus.open().unwrap();

        assert!(matches!(
            bus.bulk_read(0x3E, 4),
            Err(DriverError::ShortTransfer { sent: 5, received: 1, .. })
        ));
    }

    #[test]
    fn test_transactions_require_open() {
        let (transport, _) = Recorder::new(0);
        let mut bus = BusDevice::new(transport);
        assert!(matches!(bus.read_register(0x0F), Err(DriverError::NotOpen)));

        bus.open().unwrap();
        bus.close();
        bus.close();
        assert!(!bus.is_open());
        assert!(matches!(bus.write_register(0x10, 0), Err(DriverError::NotOpen)));
    }
}
