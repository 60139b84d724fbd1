//! Session Lifecycle Test Suite
//!
//! Runs complete recording sessions against the simulated IMU and checks what
//! lands on disk.
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_single_sample_session` | One FIFO payload becomes header + one record + metadata |
//! | `test_not_detected_then_retry` | Missing sensor creates nothing; retry succeeds |
//! | `test_bus_fault_ends_session` | Fault after 3 samples keeps those 3 and surfaces the error |
//! | `test_already_running` | Second start is rejected without disturbing the first |
//! | `test_stop_is_idempotent` | Stop when idle and double stop are no-ops |
//! | `test_existing_directory_rejected` | A session directory is never reused |
//! | `test_many_samples_in_order` | Large session drains through several flushes in order |
//! | `test_gps_stream_recorded` | GPS reports and metadata land next to the IMU files |
//! | `test_gps_failure_is_not_fatal` | Unreachable gpsd leaves the IMU session running |
//! | `test_failed_start_releases_sensor` | Storage errors at start close the bus |
//! | `test_fault_outranks_metadata_failure` | Bus fault wins over an `imu.meta` write error |
//! | `test_metadata_failure_surfaces` | `imu.meta` write failure fails an otherwise clean stop |

use std::fs;
use std::io::{self, BufRead, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use daq_driver_lsm6dsl::mock::{MockImu, MockReadyLine, MockTransport};
use daq_driver_lsm6dsl::Lsm6dsl;
use drivesense::acquisition::{AcquisitionConfig, AcquisitionLoop, StartOutcome};
use drivesense::config::ReadyMode;
use drivesense::gps::GpsConnect;
use drivesense::metadata::SessionMetadata;
use drivesense::session::{SessionConfig, SessionController};
use drivesense::status::TracingStatus;
use drivesense::writer::WriterConfig;
use drivesense::DaqError;

const HEADER: &str = "gx,gy,gz,ax_g,ay_g,az_g\n";

type Controller = SessionController<MockTransport, MockReadyLine>;

// =============================================================================
// Helpers
// =============================================================================

fn controller(imu: &MockImu, root: &Path) -> Controller {
    let device = Lsm6dsl::new(imu.transport()).with_reset_delay(Duration::ZERO);
    let acquisition = AcquisitionLoop::new(
        device,
        imu.ready_line(),
        AcquisitionConfig {
            settle_delay: Duration::ZERO,
            ready_mode: ReadyMode::Poll,
            wait_timeout: Duration::from_millis(5),
            whole_records_only: true,
        },
        Arc::new(TracingStatus),
    );
    let config = SessionConfig {
        root: root.to_path_buf(),
        writer: WriterConfig {
            flush_threshold: 4096,
            pop_timeout: Duration::from_millis(10),
        },
        queue_soft_capacity: 1024,
    };
    SessionController::new(config, acquisition)
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

fn read_meta(dir: &Path) -> SessionMetadata {
    let text = fs::read_to_string(dir.join("imu.meta")).unwrap();
    assert!(text.ends_with('\n'));
    serde_json::from_str(text.trim_end()).unwrap()
}

struct CannedGps(&'static str);

impl GpsConnect for CannedGps {
    fn connect(&self) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(Cursor::new(self.0.as_bytes().to_vec())))
    }
}

struct NoGpsd;

impl GpsConnect for NoGpsd {
    fn connect(&self) -> io::Result<Box<dyn BufRead + Send>> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "gpsd not running"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_single_sample_session() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    imu.push_samples(&[[1, 2, 3, 4, 5, 6]]);
    wait_until("sample read", || imu.samples_delivered() == 1);

    let summary = daq.stop_daq().unwrap().unwrap();
    assert_eq!(summary.session_id, "trial-1");
    assert_eq!(summary.loop_stats.samples, 1);

    let dir = root.path().join("trial-1");
    assert_eq!(
        fs::read_to_string(dir.join("imu.dat")).unwrap(),
        format!("{}1,2,3,0.0020,0.0024,0.0029\n", HEADER)
    );
    let meta = read_meta(&dir);
    assert!(meta.elapsed_time >= 0.0);
    assert!(meta.stop_time >= meta.start_time);
    assert_eq!(imu.close_count(), 1);
    assert!(imu.ready_released());
}

#[test]
fn test_not_detected_then_retry() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    imu.set_identity(0x00);
    let mut daq = controller(&imu, root.path());

    assert_eq!(
        daq.start_daq("trial-1").unwrap(),
        StartOutcome::DeviceNotDetected
    );
    assert!(!root.path().join("trial-1").exists());
    assert!(!daq.is_running());

    imu.set_identity(0x6A);
    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    assert!(root.path().join("trial-1").join("imu.dat").exists());
    daq.stop_daq().unwrap();
}

#[test]
fn test_bus_fault_ends_session() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    imu.fail_after_samples(3);
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    imu.push_samples(&[[1; 6], [2; 6], [3; 6]]);
    wait_until("poller exit", || daq.loop_finished());

    let err = daq.stop_daq().unwrap_err();
    assert!(matches!(err, DaqError::Driver(ref e) if e.is_bus_io()));
    assert!(!daq.is_running());

    let dir = root.path().join("trial-1");
    let data = fs::read_to_string(dir.join("imu.dat")).unwrap();
    let lines: Vec<&str> = data.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1], "1,1,1,0.0005,0.0005,0.0005");
    assert_eq!(lines[3], "3,3,3,0.0015,0.0015,0.0015");
    assert!(read_meta(&dir).elapsed_time >= 0.0);
    assert_eq!(imu.close_count(), 1);
}

#[test]
fn test_already_running() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    assert!(matches!(
        daq.start_daq("trial-2"),
        Err(DaqError::AlreadyRunning)
    ));
    assert!(!root.path().join("trial-2").exists());

    imu.push_samples(&[[9; 6]]);
    wait_until("sample read", || imu.samples_delivered() == 1);
    let summary = daq.stop_daq().unwrap().unwrap();
    assert_eq!(summary.loop_stats.samples, 1);
    assert_eq!(imu.open_count(), 1);
}

#[test]
fn test_stop_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert!(daq.stop_daq().unwrap().is_none());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    assert!(daq.stop_daq().unwrap().is_some());
    assert!(daq.stop_daq().unwrap().is_none());
    assert_eq!(imu.close_count(), 1);
}

#[test]
fn test_existing_directory_rejected() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("trial-1")).unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert!(matches!(
        daq.start_daq("trial-1"),
        Err(DaqError::SessionExists(_))
    ));
    assert_eq!(imu.open_count(), 0);
    assert!(fs::read_dir(root.path().join("trial-1")).unwrap().next().is_none());
}

#[test]
fn test_many_samples_in_order() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-7").unwrap(), StartOutcome::Started);
    for burst in 0..20i16 {
        let samples: Vec<[i16; 6]> = (0..50i16)
            .map(|i| {
                let n = burst * 50 + i;
                [n, -n, 0, 0, 0, 2048]
            })
            .collect();
        imu.push_samples(&samples);
    }
    wait_until("all samples read", || imu.samples_delivered() == 1000);

    let summary = daq.stop_daq().unwrap().unwrap();
    assert_eq!(summary.writer.records, 1000);
    assert!(summary.writer.flushes > 1);

    let data = fs::read_to_string(root.path().join("trial-7").join("imu.dat")).unwrap();
    let records: Vec<&str> = data.lines().skip(1).collect();
    assert_eq!(records.len(), 1000);
    for (n, line) in records.iter().enumerate() {
        assert_eq!(*line, format!("{},{},0,0.0000,0.0000,0.9994", n, -(n as i64)));
    }
}

#[test]
fn test_gps_stream_recorded() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path()).with_gps(Arc::new(CannedGps(
        "{\"class\":\"TPV\",\"mode\":3}\n{\"class\":\"SKY\"}\n",
    )));

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    wait_until("fix", || daq.fix_mode() == 3);
    daq.stop_daq().unwrap();

    let dir = root.path().join("trial-1");
    assert_eq!(
        fs::read_to_string(dir.join("gps.dat")).unwrap().lines().count(),
        2
    );
    let gps_meta: serde_json::Value =
        serde_json::from_str(fs::read_to_string(dir.join("gps.meta")).unwrap().trim_end())
            .unwrap();
    assert!(gps_meta.get("start_time").is_some());
    assert!(gps_meta.get("stop_time").is_some());
}

#[test]
fn test_gps_failure_is_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path()).with_gps(Arc::new(NoGpsd));

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    imu.push_samples(&[[1; 6]]);
    wait_until("sample read", || imu.samples_delivered() == 1);
    daq.stop_daq().unwrap();

    let dir = root.path().join("trial-1");
    assert!(!dir.join("gps.dat").exists());
    assert_eq!(
        fs::read_to_string(dir.join("imu.dat")).unwrap().lines().count(),
        2
    );
}

#[test]
fn test_failed_start_releases_sensor() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("not-a-dir");
    fs::write(&root, "occupied").unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, &root);

    assert!(matches!(daq.start_daq("trial-1"), Err(DaqError::Io(_))));
    assert!(!daq.is_running());
    assert_eq!(imu.open_count(), 1);
    assert_eq!(imu.close_count(), 1);
}

#[test]
fn test_fault_outranks_metadata_failure() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    imu.fail_after_samples(3);
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    let dir = root.path().join("trial-1");
    // A directory in the way makes the metadata write fail.
    fs::create_dir(dir.join("imu.meta")).unwrap();
    imu.push_samples(&[[1; 6], [2; 6], [3; 6]]);
    wait_until("poller exit", || daq.loop_finished());

    let err = daq.stop_daq().unwrap_err();
    assert!(matches!(err, DaqError::Driver(ref e) if e.is_bus_io()));
    assert!(!daq.is_running());
    assert_eq!(
        fs::read_to_string(dir.join("imu.dat")).unwrap().lines().count(),
        4
    );
}

#[test]
fn test_metadata_failure_surfaces() {
    let root = tempfile::tempdir().unwrap();
    let imu = MockImu::new();
    let mut daq = controller(&imu, root.path());

    assert_eq!(daq.start_daq("trial-1").unwrap(), StartOutcome::Started);
    let dir = root.path().join("trial-1");
    fs::create_dir(dir.join("imu.meta")).unwrap();
    imu.push_samples(&[[1; 6]]);
    wait_until("sample read", || imu.samples_delivered() == 1);

    assert!(matches!(daq.stop_daq(), Err(DaqError::Io(_))));
    assert!(!daq.is_running());
    assert_eq!(imu.close_count(), 1);
    assert_eq!(
        fs::read_to_string(dir.join("imu.dat")).unwrap().lines().count(),
        2
    );
}
