//! Producer side of the pipeline: the IMU polling loop.
//!
//! [`AcquisitionLoop`] owns the sensor and its data-ready line. Starting it
//! opens the bus, waits out the settle delay and checks the sensor identity.
//! A sensor that does not answer is reported as
//! [`StartOutcome::DeviceNotDetected`] and nothing is spawned. Otherwise the
//! sensor is configured and a dedicated thread runs
//!
//! ```text
//! ready? -> FIFO status -> word count -> bulk read -> decode -> push records
//! ```
//!
//! until the stop flag is cleared or the bus faults. Either way the thread
//! terminates the queue after its last record, closes the sensor, releases
//! the ready line, and puts both back in the loop's slot so it can be started
//! again. The sensor only leaves the slot once the thread is running.
//!
//! State machine: `Idle -> Configuring -> Running -> Stopping -> Idle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use daq_driver_lsm6dsl::{Lsm6dsl, ReadyGate, Transport};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ImuConfig, ReadyMode};
use crate::error::{AppResult, DaqError};
use crate::queue::QueueProducer;
use crate::status::{Status, StatusSink};

/// Acquisition loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Sensor closed, no thread.
    Idle,
    /// Opening, detecting or configuring the sensor.
    Configuring,
    /// Polling thread active.
    Running,
    /// Stop requested or the thread ended on its own.
    Stopping,
}

/// Outcome of a start request.
///
/// A missing sensor is an expected answer (the IMU may be unplugged) and can
/// be retried, so it is a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum StartOutcome {
    /// Sensor detected and configured.
    Started,
    /// WHO_AM_I did not match; the sensor was released.
    DeviceNotDetected,
}

/// Polling loop tuning.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Pause between opening the bus and the identity check.
    pub settle_delay: Duration,
    /// Busy-poll or edge-wait on the ready line.
    pub ready_mode: ReadyMode,
    /// Edge wait bound in [`ReadyMode::Wait`]; the stop flag is checked at
    /// least this often.
    pub wait_timeout: Duration,
    /// Request only whole samples from the FIFO.
    pub whole_records_only: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::from(&ImuConfig::default())
    }
}

impl From<&ImuConfig> for AcquisitionConfig {
    fn from(config: &ImuConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            ready_mode: config.ready_mode,
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            whole_records_only: config.whole_records_only,
        }
    }
}

/// Counters for one polling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// FIFO bulk reads issued.
    pub reads: u64,
    /// Samples decoded and queued.
    pub samples: u64,
    /// Payloads with a partial trailing record.
    pub anomalies: u64,
    /// Bytes dropped from partial records.
    pub dropped_bytes: u64,
}

struct Imu<T: Transport, G: ReadyGate> {
    device: Lsm6dsl<T>,
    gate: G,
}

impl<T: Transport, G: ReadyGate> Imu<T, G> {
    fn shutdown(&mut self) {
        self.device.close();
        self.gate.release();
    }
}

type ImuSlot<T, G> = Arc<Mutex<Option<Imu<T, G>>>>;

struct LoopExit {
    stats: LoopStats,
    result: AppResult<()>,
}

/// IMU producer with start/stop control.
pub struct AcquisitionLoop<T: Transport + 'static, G: ReadyGate + 'static> {
    config: AcquisitionConfig,
    status: Arc<dyn StatusSink>,
    imu: ImuSlot<T, G>,
    state: Arc<Mutex<LoopState>>,
    running: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    poller: Option<JoinHandle<LoopExit>>,
}

impl<T: Transport + 'static, G: ReadyGate + 'static> AcquisitionLoop<T, G> {
    /// Create an idle loop over an injected sensor and ready line.
    pub fn new(
        device: Lsm6dsl<T>,
        gate: G,
        config: AcquisitionConfig,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            status,
            imu: Arc::new(Mutex::new(Some(Imu { device, gate }))),
            state: Arc::new(Mutex::new(LoopState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            faulted: Arc::new(AtomicBool::new(false)),
            poller: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    /// Whether a polling thread is active or awaiting `stop_polling`.
    pub fn is_active(&self) -> bool {
        self.poller.is_some()
    }

    /// Whether the polling thread has exited on its own (bus fault or closed
    /// queue) and is waiting to be joined.
    pub fn loop_finished(&self) -> bool {
        self.poller.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Whether the current or last run ended in a fault.
    pub fn faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Open, settle, detect and configure the sensor without starting the
    /// polling thread.
    ///
    /// On [`StartOutcome::Started`] the sensor is left open and configured;
    /// follow with [`AcquisitionLoop::spawn`] or [`AcquisitionLoop::abort`].
    pub fn prepare(&mut self) -> AppResult<StartOutcome> {
        if self.poller.is_some() {
            return Err(DaqError::AlreadyRunning);
        }
        let mut slot = self.imu.lock();
        let imu = slot.as_mut().ok_or(DaqError::AlreadyRunning)?;

        *self.state.lock() = LoopState::Configuring;
        self.faulted.store(false, Ordering::SeqCst);
        self.status.notify(Status::Detecting);

        let result = Self::detect_and_configure(imu, &self.config);
        match result {
            Ok(StartOutcome::Started) => Ok(StartOutcome::Started),
            Ok(StartOutcome::DeviceNotDetected) => {
                imu.shutdown();
                *self.state.lock() = LoopState::Idle;
                warn!("IMU not detected");
                self.status.notify(Status::DeviceNotDetected);
                Ok(StartOutcome::DeviceNotDetected)
            }
            Err(e) => {
                imu.shutdown();
                *self.state.lock() = LoopState::Idle;
                error!(error = %e, "IMU startup failed");
                self.status.notify(Status::Fault(e.to_string()));
                Err(e)
            }
        }
    }

    fn detect_and_configure(
        imu: &mut Imu<T, G>,
        config: &AcquisitionConfig,
    ) -> AppResult<StartOutcome> {
        imu.device.open()?;
        if !config.settle_delay.is_zero() {
            thread::sleep(config.settle_delay);
        }
        if !imu.device.detect_device()? {
            return Ok(StartOutcome::DeviceNotDetected);
        }
        imu.device.configure()?;
        Ok(StartOutcome::Started)
    }

    /// Start the polling thread on a prepared sensor.
    pub fn spawn(&mut self, producer: QueueProducer) -> AppResult<()> {
        if self.poller.is_some() {
            return Err(DaqError::AlreadyRunning);
        }
        match self.imu.lock().as_ref() {
            Some(imu) if imu.device.is_open() => {}
            Some(_) => return Err(DaqError::Driver(daq_driver_lsm6dsl::DriverError::NotOpen)),
            None => return Err(DaqError::AlreadyRunning),
        }

        self.running.store(true, Ordering::SeqCst);
        let slot = Arc::clone(&self.imu);
        let running = Arc::clone(&self.running);
        let faulted = Arc::clone(&self.faulted);
        let state = Arc::clone(&self.state);
        let status = Arc::clone(&self.status);
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name("imu-poller".to_string())
            .spawn(move || {
                let mut stats = LoopStats::default();
                let taken = slot.lock().take();
                let result = match taken {
                    Some(mut imu) => {
                        let result = poll(&mut imu, &producer, &running, &config, &mut stats);
                        imu.shutdown();
                        *slot.lock() = Some(imu);
                        result
                    }
                    None => Err(DaqError::AlreadyRunning),
                };

                running.store(false, Ordering::SeqCst);
                *state.lock() = LoopState::Stopping;
                producer.finish();

                if let Err(e) = &result {
                    faulted.store(true, Ordering::SeqCst);
                    error!(error = %e, samples = stats.samples, "IMU polling ended by fault");
                    status.notify(Status::Fault(e.to_string()));
                }
                debug!("Poller thread exiting");
                LoopExit { stats, result }
            });

        match spawned {
            Ok(handle) => {
                self.poller = Some(handle);
                *self.state.lock() = LoopState::Running;
                self.status.notify(Status::Running);
                info!("Started IMU polling");
                Ok(())
            }
            Err(e) => {
                // The sensor never left the slot; the caller can abort or retry.
                self.running.store(false, Ordering::SeqCst);
                *self.state.lock() = LoopState::Configuring;
                Err(DaqError::Io(e))
            }
        }
    }

    /// Prepare and spawn in one step.
    pub fn start_polling(&mut self, producer: QueueProducer) -> AppResult<StartOutcome> {
        match self.prepare()? {
            StartOutcome::Started => {
                self.spawn(producer)?;
                Ok(StartOutcome::Started)
            }
            StartOutcome::DeviceNotDetected => Ok(StartOutcome::DeviceNotDetected),
        }
    }

    /// Release a prepared sensor without polling it. Does nothing while a
    /// polling thread is active; use [`AcquisitionLoop::stop_polling`].
    pub fn abort(&mut self) {
        if self.poller.is_some() {
            return;
        }
        if let Some(imu) = self.imu.lock().as_mut() {
            imu.shutdown();
        }
        *self.state.lock() = LoopState::Idle;
    }

    /// Stop the polling thread and wait for it.
    ///
    /// Returns `Ok(None)` when nothing was running, the run's counters on a
    /// clean stop, and the fault that ended the run otherwise. Calling it
    /// again after a stop is a no-op.
    pub fn stop_polling(&mut self) -> AppResult<Option<LoopStats>> {
        let Some(handle) = self.poller.take() else {
            return Ok(None);
        };

        *self.state.lock() = LoopState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        let exit = handle
            .join()
            .map_err(|_| DaqError::ThreadPanicked("poller"));
        *self.state.lock() = LoopState::Idle;
        let exit = exit?;

        info!(
            reads = exit.stats.reads,
            samples = exit.stats.samples,
            anomalies = exit.stats.anomalies,
            dropped_bytes = exit.stats.dropped_bytes,
            "Stopped IMU polling"
        );

        exit.result?;
        self.status.notify(Status::Stopped);
        Ok(Some(exit.stats))
    }
}

impl<T: Transport + 'static, G: ReadyGate + 'static> Drop for AcquisitionLoop<T, G> {
    fn drop(&mut self) {
        if self.poller.is_some() {
            if let Err(e) = self.stop_polling() {
                error!("Error stopping IMU polling on drop: {}", e);
            }
        } else {
            self.abort();
        }
    }
}

fn poll<T: Transport, G: ReadyGate>(
    imu: &mut Imu<T, G>,
    producer: &QueueProducer,
    running: &AtomicBool,
    config: &AcquisitionConfig,
    stats: &mut LoopStats,
) -> AppResult<()> {
    while running.load(Ordering::SeqCst) {
        let ready = match config.ready_mode {
            ReadyMode::Poll => imu.gate.is_ready()?,
            ReadyMode::Wait => imu.gate.wait_ready(config.wait_timeout)?,
        };
        if !ready {
            continue;
        }

        let fifo = imu.device.read_status()?;
        let words = if config.whole_records_only {
            fifo.whole_sample_words()
        } else {
            fifo.word_count()
        };
        if words == 0 {
            continue;
        }

        let decoded = imu.device.read_samples(words)?;
        stats.reads += 1;
        if let Some(anomaly) = decoded.anomaly {
            stats.anomalies += 1;
            stats.dropped_bytes += anomaly.dropped as u64;
            warn!(
                payload_len = anomaly.payload_len,
                dropped = anomaly.dropped,
                "{}",
                anomaly
            );
        }

        for sample in &decoded.samples {
            producer.push(sample.to_record().into_bytes())?;
        }
        stats.samples += decoded.samples.len() as u64;
    }
    Ok(())
}
