//! GPS stream recorded alongside the IMU.
//!
//! The receiver is read through gpsd: [`GpsdConnector`] opens the JSON watch
//! stream and [`GpsPoller`] appends every report line to `gps.dat` in the
//! session directory while tracking the latest fix mode for the status
//! indicator. GPS is auxiliary; a failing connection never stops the IMU
//! session.
//!
//! Receiver setup (navigation rate, UART baud) uses UBX frames built by
//! [`UbxCommand::frame`] and, with the `gps_serial` feature, written straight
//! to the receiver's serial port.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::GpsConfig;
use crate::error::{AppResult, DaqError};
use crate::metadata::{self, GpsMetadata, GPS_DATA_FILE, GPS_META_FILE};

/// gpsd request enabling JSON reports.
pub const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};";

// UBX-CFG-PWR payloads: version, reserved, then the "STOP" / "RUN " state tag.
const PWR_BACKUP: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0x50, 0x4F, 0x54, 0x53];
const PWR_RUN: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0x20, 0x4E, 0x55, 0x52];

/// Navigation solution rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavRate {
    /// 2 Hz.
    Hz2,
    /// 5 Hz.
    Hz5,
    /// 10 Hz.
    Hz10,
}

impl NavRate {
    /// Rate for a frequency in Hz, if supported.
    pub fn from_hz(hz: u8) -> Option<Self> {
        match hz {
            2 => Some(Self::Hz2),
            5 => Some(Self::Hz5),
            10 => Some(Self::Hz10),
            _ => None,
        }
    }

    fn measurement_ms(self) -> u16 {
        match self {
            Self::Hz2 => 500,
            Self::Hz5 => 200,
            Self::Hz10 => 100,
        }
    }
}

/// Receiver configuration commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UbxCommand {
    /// Controlled software reset.
    Reset,
    /// Set the navigation rate.
    Rate(NavRate),
    /// Set the UART1 baud rate (UBX + NMEA in and out).
    Baud(u32),
    /// Enter power-save backup mode.
    Sleep,
    /// Leave backup mode.
    Wake,
}

impl UbxCommand {
    /// Complete UBX frame: sync chars, class, id, length, payload, checksum.
    pub fn frame(&self) -> Vec<u8> {
        match *self {
            Self::Reset => ubx_frame(0x06, 0x04, &[0xFF, 0xFF, 0x02, 0x00]),
            Self::Rate(rate) => {
                let mut payload = rate.measurement_ms().to_le_bytes().to_vec();
                // navigation cycles per measurement, GPS time reference
                payload.extend_from_slice(&[0x01, 0x00, 0x01, 0x00]);
                ubx_frame(0x06, 0x08, &payload)
            }
            Self::Baud(baud) => {
                let mut payload = vec![0x01, 0x00, 0x00, 0x00, 0xD0, 0x08, 0x00, 0x00];
                payload.extend_from_slice(&baud.to_le_bytes());
                payload.extend_from_slice(&[0x07, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
                ubx_frame(0x06, 0x00, &payload)
            }
            Self::Sleep => ubx_frame(0x06, 0x57, &PWR_BACKUP),
            Self::Wake => ubx_frame(0x06, 0x57, &PWR_RUN),
        }
    }
}

impl FromStr for UbxCommand {
    type Err = DaqError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let command = match name {
            "reset" => Self::Reset,
            "rate-2" => Self::Rate(NavRate::Hz2),
            "rate-5" => Self::Rate(NavRate::Hz5),
            "rate-10" => Self::Rate(NavRate::Hz10),
            "baud-9600" => Self::Baud(9600),
            "baud-115200" => Self::Baud(115_200),
            "sleep" => Self::Sleep,
            "wake" => Self::Wake,
            other => {
                return Err(DaqError::Configuration(format!(
                    "Unsupported GPS command '{}'",
                    other
                )))
            }
        };
        Ok(command)
    }
}

/// Build a UBX frame with its 8-bit Fletcher checksum over class..payload.
pub fn ubx_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&[0xB5, 0x62, class, id]);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);

    let (mut ck_a, mut ck_b) = (0u8, 0u8);
    for &byte in &frame[2..] {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

/// Send UBX commands over the receiver's UART at `baud`.
#[cfg(feature = "gps_serial")]
pub fn send_ubx(port: &str, baud: u32, commands: &[UbxCommand]) -> AppResult<()> {
    let mut serial = serialport::new(port, baud)
        .timeout(Duration::from_secs(5))
        .open()
        .map_err(io::Error::from)?;
    for command in commands {
        serial.write_all(&command.frame())?;
        serial.flush()?;
        debug!(port, ?command, "Sent UBX command");
    }
    Ok(())
}

/// Send UBX commands over the receiver's UART at `baud`.
#[cfg(not(feature = "gps_serial"))]
pub fn send_ubx(_port: &str, _baud: u32, _commands: &[UbxCommand]) -> AppResult<()> {
    Err(DaqError::FeatureNotEnabled("gps_serial".to_string()))
}

/// Put the receiver into its logging configuration.
///
/// A fresh receiver listens at 9600 baud: the rate is set first, then the
/// UART is switched to the configured baud.
pub fn configure_receiver(config: &GpsConfig) -> AppResult<()> {
    let rate = NavRate::from_hz(config.rate_hz).ok_or_else(|| {
        DaqError::Configuration(format!("Unsupported GPS rate {} Hz", config.rate_hz))
    })?;
    info!(
        rate_hz = config.rate_hz,
        baud = config.baud,
        "Configuring GPS receiver"
    );
    send_ubx(&config.serial_port, 9600, &[UbxCommand::Rate(rate)])?;
    thread::sleep(Duration::from_secs(1));
    send_ubx(&config.serial_port, 9600, &[UbxCommand::Baud(config.baud)])
}

/// A source of gpsd report lines.
pub trait GpsConnect: Send + Sync {
    /// Open a new report stream.
    fn connect(&self) -> io::Result<Box<dyn BufRead + Send>>;
}

/// TCP connection to gpsd.
#[derive(Debug, Clone)]
pub struct GpsdConnector {
    addr: String,
    read_timeout: Duration,
}

impl GpsdConnector {
    /// Connector for gpsd at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            read_timeout: Duration::from_millis(500),
        }
    }

    /// Bound on each read; the poller checks its stop flag this often.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl GpsConnect for GpsdConnector {
    fn connect(&self) -> io::Result<Box<dyn BufRead + Send>> {
        let mut stream = TcpStream::connect(&self.addr)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.write_all(WATCH_COMMAND)?;
        debug!(addr = %self.addr, "Connected to gpsd");
        Ok(Box::new(BufReader::new(stream)))
    }
}

/// Shared view of the latest fix mode: 0 unknown, 1 no fix, 2 2D, 3 3D.
#[derive(Debug, Clone, Default)]
pub struct FixMode(Arc<AtomicU8>);

impl FixMode {
    /// Latest TPV mode.
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, mode: u8) {
        self.0.store(mode, Ordering::Relaxed);
    }
}

#[derive(Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: Option<u8>,
}

/// Per-session GPS recorder.
pub struct GpsPoller {
    dir: PathBuf,
    start_time: f64,
    running: Arc<AtomicBool>,
    fix: FixMode,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

impl GpsPoller {
    /// Start recording `source` into `<dir>/gps.dat`.
    pub fn start(dir: &Path, source: Box<dyn BufRead + Send>, fix: FixMode) -> AppResult<Self> {
        let file = File::create(dir.join(GPS_DATA_FILE))?;
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let thread_fix = fix.clone();
        let handle = thread::Builder::new()
            .name("gps-poller".to_string())
            .spawn(move || record(source, BufWriter::new(file), &thread_running, &thread_fix))?;

        info!(dir = %dir.display(), "Starting GPS DAQ");
        Ok(Self {
            dir: dir.to_path_buf(),
            start_time: metadata::now_unix_seconds(),
            running,
            fix,
            handle: Some(handle),
        })
    }

    /// Latest fix mode.
    pub fn fix_mode(&self) -> u8 {
        self.fix.get()
    }

    /// Stop recording and write `gps.meta`.
    pub fn stop(mut self) -> AppResult<GpsMetadata> {
        self.running.store(false, Ordering::SeqCst);
        let meta = GpsMetadata {
            start_time: self.start_time,
            stop_time: metadata::now_unix_seconds(),
        };

        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(Ok(reports)) => info!(reports, "Stopping GPS DAQ"),
                Ok(Err(e)) => warn!(error = %e, "GPS stream ended with error"),
                Err(_) => return Err(DaqError::ThreadPanicked("gps")),
            }
        }

        metadata::write_json_line(&self.dir.join(GPS_META_FILE), &meta)?;
        Ok(meta)
    }
}

impl Drop for GpsPoller {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("GPS thread panicked");
            }
        }
    }
}

fn record<W: Write>(
    mut source: Box<dyn BufRead + Send>,
    mut out: W,
    running: &AtomicBool,
    fix: &FixMode,
) -> io::Result<u64> {
    let mut reports = 0u64;
    let mut line = String::new();

    while running.load(Ordering::SeqCst) {
        match source.read_line(&mut line) {
            Ok(0) => {
                debug!("gpsd stream closed");
                break;
            }
            Ok(_) => {
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if let Ok(report) = serde_json::from_str::<Report>(line.trim_end()) {
                    if report.class == "TPV" {
                        if let Some(mode) = report.mode {
                            fix.set(mode);
                        }
                    }
                }
                out.write_all(line.as_bytes())?;
                reports += 1;
                line.clear();
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                out.flush()?;
                return Err(e);
            }
        }
    }

    out.flush()?;
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::net::TcpListener;

    fn hex(frame: &[u8]) -> String {
        frame.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_rate_frames_match_receiver_strings() {
        assert_eq!(
            hex(&UbxCommand::Rate(NavRate::Hz10).frame()),
            "B5 62 06 08 06 00 64 00 01 00 01 00 7A 12"
        );
        assert_eq!(
            hex(&UbxCommand::Rate(NavRate::Hz5).frame()),
            "B5 62 06 08 06 00 C8 00 01 00 01 00 DE 6A"
        );
        assert_eq!(
            hex(&UbxCommand::Rate(NavRate::Hz2).frame()),
            "B5 62 06 08 06 00 F4 01 01 00 01 00 0B 77"
        );
    }

    #[test]
    fn test_baud_and_power_frames() {
        let fast = UbxCommand::Baud(115_200).frame();
        assert_eq!(fast.len(), 28);
        assert_eq!(&fast[14..18], &[0x00, 0xC2, 0x01, 0x00]);
        assert_eq!(&fast[26..], &[0xC0, 0x7E]);

        let slow = UbxCommand::Baud(9600).frame();
        assert_eq!(&slow[26..], &[0xA2, 0xB5]);

        assert_eq!(
            hex(&UbxCommand::Reset.frame()),
            "B5 62 06 04 04 00 FF FF 02 00 0E 61"
        );
        assert_eq!(&UbxCommand::Sleep.frame()[14..], &[0xAC, 0x85]);
        assert_eq!(&UbxCommand::Wake.frame()[14..], &[0x7B, 0xC3]);
    }

    #[test]
    fn test_parse_command_names() {
        assert_eq!("rate-5".parse::<UbxCommand>().unwrap(), UbxCommand::Rate(NavRate::Hz5));
        assert_eq!("baud-9600".parse::<UbxCommand>().unwrap(), UbxCommand::Baud(9600));
        assert!("rate-7".parse::<UbxCommand>().is_err());
    }

    #[test]
    fn test_poller_records_reports_and_fix() {
        let dir = tempfile::tempdir().unwrap();
        let reports = concat!(
            "{\"class\":\"VERSION\",\"release\":\"3.22\"}\n",
            "{\"class\":\"TPV\",\"mode\":3,\"lat\":47.65,\"lon\":-122.30}\n",
            "{\"class\":\"SKY\",\"satellites\":[]}"
        );
        let fix = FixMode::default();
        let poller = GpsPoller::start(
            dir.path(),
            Box::new(Cursor::new(reports.as_bytes().to_vec())),
            fix.clone(),
        )
        .unwrap();

        // The cursor hits EOF quickly; wait for the thread to drain it.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fix.get() != 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(poller.fix_mode(), 3);

        let meta = poller.stop().unwrap();
        assert!(meta.stop_time >= meta.start_time);

        let data = std::fs::read_to_string(dir.path().join(GPS_DATA_FILE)).unwrap();
        assert_eq!(data.lines().count(), 3);
        assert!(data.ends_with("\"satellites\":[]}\n"));
        assert!(dir.path().join(GPS_META_FILE).exists());
    }

    #[test]
    fn test_gpsd_connector_sends_watch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; WATCH_COMMAND.len()];
            stream.read_exact(&mut request).unwrap();
            stream
                .write_all(b"{\"class\":\"TPV\",\"mode\":2}\n")
                .unwrap();
            request
        });

        let connector = GpsdConnector::new(addr.to_string())
            .with_read_timeout(Duration::from_millis(50));
        let mut source = connector.connect().unwrap();
        let mut line = String::new();
        source.read_line(&mut line).unwrap();

        assert_eq!(server.join().unwrap(), WATCH_COMMAND);
        assert!(line.contains("\"mode\":2"));
    }

    #[test]
    fn test_read_timeout_keeps_polling_until_stop() {
        struct Silent;
        impl Read for Silent {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                thread::sleep(Duration::from_millis(2));
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let poller =
            GpsPoller::start(dir.path(), Box::new(BufReader::new(Silent)), FixMode::default())
                .unwrap();
        thread::sleep(Duration::from_millis(20));
        poller.stop().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(GPS_DATA_FILE)).unwrap(),
            ""
        );
    }
}
