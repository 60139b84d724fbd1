//! Simulated LSM6DSL for tests and bench runs without hardware.
//!
//! [`MockImu`] is a cloneable handle onto one simulated sensor. It hands out a
//! [`MockTransport`] and a [`MockReadyLine`] that can be moved into the
//! acquisition thread while the test keeps scripting the sensor: queueing
//! FIFO samples, changing the identity answer, or injecting bus faults.
//!
//! The register model follows the datasheet closely enough for the driver:
//! reads set bit 7 of the address byte, the first byte clocked in is an echo,
//! FIFO_STATUS1/2 report the unread word count, and burst reads from
//! FIFO_DATA_OUT_L drain the FIFO.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::Transport;
use crate::error::{DriverError, Result};
use crate::fifo::{Sample, SAMPLE_BYTES};
use crate::ready::ReadyGate;
use crate::registers;

/// Largest word count the 12-bit status field can report.
const MAX_REPORTED_WORDS: usize = 0x0FFF;

#[derive(Debug)]
struct MockState {
    identity: u8,
    registers: [u8; 128],
    writes: Vec<(u8, u8)>,
    fifo: VecDeque<u8>,
    samples_delivered: usize,
    fault_after_samples: Option<usize>,
    faulted: bool,
    bus_unavailable: bool,
    opens: u32,
    closes: u32,
    ready_released: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            identity: registers::WHO_AM_I_VALUE,
            registers: [0; 128],
            writes: Vec::new(),
            fifo: VecDeque::new(),
            samples_delivered: 0,
            fault_after_samples: None,
            faulted: false,
            bus_unavailable: false,
            opens: 0,
            closes: 0,
            ready_released: false,
        }
    }
}

impl MockState {
    fn fifo_words(&self) -> usize {
        (self.fifo.len() / 2).min(MAX_REPORTED_WORDS)
    }

    fn read_register(&self, addr: u8) -> u8 {
        let words = self.fifo_words();
        match addr {
            registers::WHO_AM_I => self.identity,
            registers::FIFO_STATUS1 => (words & 0xFF) as u8,
            registers::FIFO_STATUS2 => {
                let empty = if words == 0 { 0x10 } else { 0x00 };
                ((words >> 8) & 0x0F) as u8 | empty
            }
            registers::FIFO_STATUS3 | registers::FIFO_STATUS4 => 0,
            other => self.registers[usize::from(other & 0x7F)],
        }
    }

    fn check_fault(&mut self) -> io::Result<()> {
        if let Some(limit) = self.fault_after_samples {
            if self.samples_delivered >= limit {
                self.faulted = true;
            }
        }
        if self.faulted {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated bus fault",
            ));
        }
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8]) -> io::Result<Vec<u8>> {
        if tx.is_empty() {
            return Ok(Vec::new());
        }
        self.check_fault()?;

        let command = tx[0];
        let addr = command & !registers::READ_FLAG;
        let mut rx = Vec::with_capacity(tx.len());
        rx.push(0x00);

        if command & registers::READ_FLAG == 0 {
            for (offset, &value) in tx[1..].iter().enumerate() {
                let reg = addr.wrapping_add(offset as u8) & 0x7F;
                self.registers[usize::from(reg)] = value;
                self.writes.push((reg, value));
                rx.push(0x00);
            }
            return Ok(rx);
        }

        if addr == registers::FIFO_DATA_OUT_L {
            let n = tx.len() - 1;
            for _ in 0..n {
                rx.push(self.fifo.pop_front().unwrap_or(0));
            }
            self.samples_delivered += n / SAMPLE_BYTES;
        } else {
            for offset in 0..tx.len() - 1 {
                rx.push(self.read_register(addr.wrapping_add(offset as u8) & 0x7F));
            }
        }
        Ok(rx)
    }
}

/// Handle onto a simulated sensor.
#[derive(Clone, Default)]
pub struct MockImu {
    state: Arc<Mutex<MockState>>,
}

impl MockImu {
    /// A sensor that answers WHO_AM_I correctly and has an empty FIFO.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus transport for this sensor.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: Arc::clone(&self.state),
            open: false,
        }
    }

    /// Ready line for this sensor. High while the FIFO holds a whole sample
    /// or a bus fault has been tripped.
    pub fn ready_line(&self) -> MockReadyLine {
        MockReadyLine {
            state: Arc::clone(&self.state),
        }
    }

    /// Change the WHO_AM_I answer.
    pub fn set_identity(&self, identity: u8) {
        self.state.lock().identity = identity;
    }

    /// Make `open()` fail as if the bus could not be claimed.
    pub fn set_bus_unavailable(&self, unavailable: bool) {
        self.state.lock().bus_unavailable = unavailable;
    }

    /// Append samples to the FIFO as `[gx, gy, gz, ax, ay, az]`.
    pub fn push_samples(&self, samples: &[[i16; 6]]) {
        let mut state = self.state.lock();
        for s in samples {
            let sample = Sample {
                gx: s[0],
                gy: s[1],
                gz: s[2],
                ax: s[3],
                ay: s[4],
                az: s[5],
            };
            state.fifo.extend(sample.to_bytes());
        }
    }

    /// Append raw bytes to the FIFO.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.state.lock().fifo.extend(bytes.iter().copied());
    }

    /// Fail every transaction once `n` whole samples have been read out.
    pub fn fail_after_samples(&self, n: usize) {
        self.state.lock().fault_after_samples = Some(n);
    }

    /// Bytes still queued in the FIFO.
    pub fn fifo_len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    /// Whole samples read out of the FIFO so far.
    pub fn samples_delivered(&self) -> usize {
        self.state.lock().samples_delivered
    }

    /// Current value of a register.
    pub fn register(&self, addr: u8) -> u8 {
        self.state.lock().read_register(addr)
    }

    /// Every register write seen, in order.
    pub fn register_writes(&self) -> Vec<(u8, u8)> {
        self.state.lock().writes.clone()
    }

    /// Number of successful `open()` calls.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opens
    }

    /// Number of `close()` calls that released an open bus.
    pub fn close_count(&self) -> u32 {
        self.state.lock().closes
    }

    /// Whether the ready line has been released.
    pub fn ready_released(&self) -> bool {
        self.state.lock().ready_released
    }
}

/// [`Transport`] half of a [`MockImu`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.bus_unavailable {
            return Err(DriverError::BusUnavailable {
                path: "mock".to_string(),
                message: "simulated claim failure".to_string(),
            });
        }
        state.opens += 1;
        state.ready_released = false;
        self.open = true;
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8]) -> io::Result<Vec<u8>> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock bus closed"));
        }
        self.state.lock().transfer(tx)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().closes += 1;
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// [`ReadyGate`] half of a [`MockImu`].
pub struct MockReadyLine {
    state: Arc<Mutex<MockState>>,
}

impl ReadyGate for MockReadyLine {
    fn is_ready(&mut self) -> Result<bool> {
        let state = self.state.lock();
        let tripped = state
            .fault_after_samples
            .is_some_and(|limit| state.samples_delivered >= limit);
        Ok(state.fifo.len() >= SAMPLE_BYTES || tripped || state.faulted)
    }

    fn release(&mut self) {
        self.state.lock().ready_released = true;
    }
}
