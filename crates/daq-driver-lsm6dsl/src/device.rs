//! LSM6DSL device handle.
//!
//! [`Lsm6dsl`] wraps a [`BusDevice`] with the sensor-specific operations the
//! acquisition loop needs: identity check, configuration, and FIFO reads.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::bus::{BusDevice, Transport};
use crate::error::Result;
use crate::fifo::{decode_samples, DecodedPayload, FifoStatus};
use crate::registers;

/// Delay after the software reset before the sensor accepts configuration.
const RESET_DELAY: Duration = Duration::from_millis(100);

/// LSM6DSL on a register bus.
pub struct Lsm6dsl<T: Transport> {
    bus: BusDevice<T>,
    reset_delay: Duration,
}

impl<T: Transport> Lsm6dsl<T> {
    /// Create a driver over `transport`. The bus is not opened yet.
    pub fn new(transport: T) -> Self {
        Self {
            bus: BusDevice::new(transport),
            reset_delay: RESET_DELAY,
        }
    }

    /// Override the post-reset delay (simulated devices need none).
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Claim the bus.
    pub fn open(&mut self) -> Result<()> {
        self.bus.open()
    }

    /// Whether the bus is claimed.
    pub fn is_open(&self) -> bool {
        self.bus.is_open()
    }

    /// Read WHO_AM_I and compare it with the expected identity.
    pub fn detect_device(&mut self) -> Result<bool> {
        let found = self
            .bus
            .detect_device(registers::WHO_AM_I, registers::WHO_AM_I_VALUE)?;
        if found {
            info!("Found LSM6DSL IMU");
        }
        Ok(found)
    }

    /// Reset the sensor and apply the acquisition configuration.
    pub fn configure(&mut self) -> Result<()> {
        self.bus
            .write_register(registers::CTRL3_C, registers::CTRL3_C_SW_RESET)?;
        if !self.reset_delay.is_zero() {
            thread::sleep(self.reset_delay);
        }

        for &(addr, value) in registers::CONFIG_SEQUENCE {
            self.bus.write_register(addr, value)?;
        }
        debug!(
            writes = registers::CONFIG_SEQUENCE.len(),
            "Applied sensor configuration"
        );
        Ok(())
    }

    /// Read FIFO_STATUS1..4 in register order.
    pub fn read_status(&mut self) -> Result<FifoStatus> {
        let mut bytes = [0u8; 4];
        for (slot, addr) in bytes.iter_mut().zip([
            registers::FIFO_STATUS1,
            registers::FIFO_STATUS2,
            registers::FIFO_STATUS3,
            registers::FIFO_STATUS4,
        ]) {
            *slot = self.bus.read_register(addr)?;
        }
        Ok(FifoStatus::from_bytes(bytes))
    }

    /// Drain `word_count` words from the FIFO in one bulk read.
    pub fn read_payload(&mut self, word_count: u16) -> Result<Vec<u8>> {
        self.bus
            .bulk_read(registers::FIFO_DATA_OUT_L, usize::from(word_count) * 2)
    }

    /// Read and decode `word_count` words.
    pub fn read_samples(&mut self, word_count: u16) -> Result<DecodedPayload> {
        let payload = self.read_payload(word_count)?;
        Ok(decode_samples(&payload))
    }

    /// Release the bus. Idempotent.
    pub fn close(&mut self) {
        self.bus.close();
    }
}
