//! FIFO status interpretation and sample decoding.
//!
//! With gyroscope and accelerometer both routed to the FIFO, each sample is
//! six little-endian 16-bit words in the order `gx gy gz ax ay az`, i.e.
//! [`SAMPLE_BYTES`] contiguous bytes.

use std::fmt;
use std::fmt::Write as _;

use crate::registers::ACCEL_SENSITIVITY_G;

/// Size of one encoded sample in the FIFO.
pub const SAMPLE_BYTES: usize = 12;

/// 16-bit words per sample.
pub const SAMPLE_WORDS: usize = SAMPLE_BYTES / 2;

/// CSV header written at the top of every IMU data file.
pub const CSV_HEADER: &str = "gx,gy,gz,ax_g,ay_g,az_g\n";

/// Raw FIFO_STATUS1..4 bytes, in register order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoStatus {
    /// FIFO_STATUS1: word count bits 0..8.
    pub status1: u8,
    /// FIFO_STATUS2: word count bits 8..12 and flags.
    pub status2: u8,
    /// FIFO_STATUS3.
    pub status3: u8,
    /// FIFO_STATUS4.
    pub status4: u8,
}

impl FifoStatus {
    /// Build from the four bytes as read.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            status1: bytes[0],
            status2: bytes[1],
            status3: bytes[2],
            status4: bytes[3],
        }
    }

    /// Number of unread 16-bit words, 0..=4095.
    pub fn word_count(&self) -> u16 {
        (u16::from(self.status2 & 0x0F) << 8) | u16::from(self.status1)
    }

    /// Number of unread bytes.
    pub fn byte_count(&self) -> usize {
        usize::from(self.word_count()) * 2
    }

    /// Words to request so that only whole samples are drained.
    pub fn whole_sample_words(&self) -> u16 {
        let words = self.word_count();
        words - words % SAMPLE_WORDS as u16
    }
}

/// One decoded gyroscope + accelerometer sample, raw LSB units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    /// Gyroscope X.
    pub gx: i16,
    /// Gyroscope Y.
    pub gy: i16,
    /// Gyroscope Z.
    pub gz: i16,
    /// Accelerometer X.
    pub ax: i16,
    /// Accelerometer Y.
    pub ay: i16,
    /// Accelerometer Z.
    pub az: i16,
}

impl Sample {
    /// Decode from exactly [`SAMPLE_BYTES`] bytes.
    pub fn from_bytes(bytes: &[u8; SAMPLE_BYTES]) -> Self {
        let word = |i: usize| i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        Self {
            gx: word(0),
            gy: word(1),
            gz: word(2),
            ax: word(3),
            ay: word(4),
            az: word(5),
        }
    }

    /// Encode back to the FIFO byte layout.
    pub fn to_bytes(&self) -> [u8; SAMPLE_BYTES] {
        let mut out = [0u8; SAMPLE_BYTES];
        for (i, v) in [self.gx, self.gy, self.gz, self.ax, self.ay, self.az]
            .iter()
            .enumerate()
        {
            out[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Accelerometer axes in g.
    pub fn accel_g(&self) -> [f64; 3] {
        [
            scale_accel(self.ax),
            scale_accel(self.ay),
            scale_accel(self.az),
        ]
    }

    /// Render as one storage record: `gx,gy,gz,ax_g,ay_g,az_g\n`.
    ///
    /// Gyro axes stay raw integers; accelerometer axes are scaled and printed
    /// with four decimals.
    pub fn to_record(&self) -> String {
        let [ax, ay, az] = self.accel_g();
        let mut line = String::with_capacity(48);
        let _ = writeln!(
            line,
            "{},{},{},{:.4},{:.4},{:.4}",
            self.gx, self.gy, self.gz, ax, ay, az
        );
        line
    }
}

/// Convert a raw accelerometer reading to g.
pub fn scale_accel(raw: i16) -> f64 {
    f64::from(raw) * ACCEL_SENSITIVITY_G
}

/// A payload whose length was not a whole number of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolAnomaly {
    /// Length of the payload as received.
    pub payload_len: usize,
    /// Trailing bytes that were dropped.
    pub dropped: usize,
}

impl fmt::Display for ProtocolAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FIFO payload of {} bytes is not a multiple of {}; dropped {} trailing bytes",
            self.payload_len, SAMPLE_BYTES, self.dropped
        )
    }
}

/// Result of decoding one FIFO payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    /// Whole samples, in FIFO order.
    pub samples: Vec<Sample>,
    /// Set when a partial trailing record was dropped.
    pub anomaly: Option<ProtocolAnomaly>,
}

/// Split a payload into samples.
///
/// Only whole 12-byte groups are decoded; a partial trailing group is
/// reported through [`DecodedPayload::anomaly`] instead of being decoded.
pub fn decode_samples(payload: &[u8]) -> DecodedPayload {
    let chunks = payload.chunks_exact(SAMPLE_BYTES);
    let remainder = chunks.remainder().len();
    let samples = chunks
        .map(|chunk| {
            let mut group = [0u8; SAMPLE_BYTES];
            group.copy_from_slice(chunk);
            Sample::from_bytes(&group)
        })
        .collect();

    let anomaly = (remainder != 0).then_some(ProtocolAnomaly {
        payload_len: payload.len(),
        dropped: remainder,
    });

    DecodedPayload { samples, anomaly }
}
