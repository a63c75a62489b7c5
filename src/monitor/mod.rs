//! Health Monitor Module
//!
//! Periodically asks the server for its TPS report and restarts it when the
//! average drops below a floor, when it stops answering, or when a periodic
//! maintenance restart is due.

pub mod config;
pub mod marker;
pub mod probe;

pub use config::MonitorConfig;
pub use marker::{PeriodicMarker, MARKER_FILE_NAME};
pub use probe::{parse_tps, TpsReading};

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::core::utils::{epoch_millis, join_with_timeout};
use crate::watchdog::ProcessControl;

/// Delay before the first probe
pub const INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Command that asks the server to shut itself down
const STOP_COMMAND: &str = "stop";

/// Why a probe was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRunning,
    Cooldown,
}

/// Result of the probe step of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Skipped(SkipReason),
    /// A TPS report at or above the floor
    Healthy(TpsReading),
    /// A TPS report below the floor
    LowTps { reading: TpsReading, restarted: bool },
    /// No report within the response timeout
    Unresponsive { count: u32 },
    /// The unresponsive threshold was reached and the server was restarted
    ForcedRestart,
}

/// What one tick observed and did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub probe: ProbeOutcome,
    pub periodic_restart: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    unresponsive_count: u32,
    last_restart: Option<Instant>,
}

enum Signal {
    Shutdown,
    Reschedule,
}

struct Worker {
    signals: Sender<Signal>,
    thread: JoinHandle<()>,
}

struct MonitorInner {
    process: Arc<dyn ProcessControl>,
    config: RwLock<MonitorConfig>,
    marker: Option<PeriodicMarker>,
    state: Mutex<MonitorState>,
}

/// Scheduled TPS prober with restart policy
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    initial_delay: Duration,
    worker: Mutex<Option<Worker>>,
}

impl HealthMonitor {
    /// Create a monitor. `marker` persists the periodic restart schedule;
    /// without it periodic restarts are disabled.
    pub fn new(
        process: Arc<dyn ProcessControl>,
        config: MonitorConfig,
        marker: Option<PeriodicMarker>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                process,
                config: RwLock::new(config),
                marker,
                state: Mutex::new(MonitorState::default()),
            }),
            initial_delay: INITIAL_DELAY,
            worker: Mutex::new(None),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Start the schedule; no-op if already started
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (signals, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let initial_delay = self.initial_delay;
        let spawned = thread::Builder::new()
            .name("health-monitor".to_string())
            .spawn(move || schedule(inner, rx, initial_delay));

        match spawned {
            Ok(thread) => {
                tracing::info!(
                    target: "monitor",
                    interval_secs = self.inner.config.read().check_interval().as_secs(),
                    "Health monitor started"
                );
                *worker = Some(Worker { signals, thread });
            }
            Err(e) => tracing::error!(target: "monitor", "Failed to start health monitor: {}", e),
        }
    }

    /// Stop the schedule and join the worker with a bounded wait
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.signals.send(Signal::Shutdown);
        join_with_timeout(worker.thread, Duration::from_secs(2));
        tracing::info!(target: "monitor", "Health monitor stopped");
    }

    pub fn is_started(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Replace the configuration; a changed interval takes effect immediately
    pub fn update_config(&self, config: MonitorConfig) {
        let reschedule = {
            let mut current = self.inner.config.write();
            let reschedule = current.check_interval_secs != config.check_interval_secs;
            *current = config;
            reschedule
        };
        tracing::info!(target: "monitor", reschedule, "Monitor configuration updated");

        if reschedule {
            if let Some(worker) = self.worker.lock().as_ref() {
                let _ = worker.signals.send(Signal::Reschedule);
            }
        }
    }

    pub fn config(&self) -> MonitorConfig {
        self.inner.config.read().clone()
    }

    pub fn unresponsive_count(&self) -> u32 {
        self.inner.state.lock().unresponsive_count
    }

    /// Run one probe cycle on the calling thread
    pub fn tick(&self) -> TickReport {
        self.inner.tick()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn schedule(inner: Arc<MonitorInner>, signals: Receiver<Signal>, initial_delay: Duration) {
    let mut wait = initial_delay;
    loop {
        match signals.recv_timeout(wait) {
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Reschedule) => {
                wait = inner.config.read().check_interval();
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let started = Instant::now();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| inner.tick())) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(target: "monitor", "Health check failed: {}", message);
        }

        // Fixed rate: subtract the time the tick itself took.
        wait = inner
            .config
            .read()
            .check_interval()
            .saturating_sub(started.elapsed());
    }
}

impl MonitorInner {
    fn tick(&self) -> TickReport {
        let config = self.config.read().clone();
        let probe = self.probe(&config);
        let periodic_restart = self.check_periodic_restart(&config);
        TickReport {
            probe,
            periodic_restart,
        }
    }

    fn probe(&self, config: &MonitorConfig) -> ProbeOutcome {
        if !self.process.is_running() {
            return ProbeOutcome::Skipped(SkipReason::NotRunning);
        }
        if !self.cooldown_elapsed(config) {
            return ProbeOutcome::Skipped(SkipReason::Cooldown);
        }

        let mut stale = 0usize;
        while self.process.poll_output_line(Duration::ZERO).is_some() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(target: "monitor", stale, "Discarded output queued before the TPS query");
        }

        self.process.send_command(&config.tps_command);

        let Some(reading) = self.await_reading(config.response_timeout()) else {
            let count = {
                let mut state = self.state.lock();
                state.unresponsive_count += 1;
                state.unresponsive_count
            };
            tracing::warn!(target: "monitor", count, "No TPS response");

            if count >= config.unresponsive_threshold {
                tracing::warn!(target: "monitor", "Server unresponsive, forcing restart");
                self.restart();
                self.state.lock().unresponsive_count = 0;
                return ProbeOutcome::ForcedRestart;
            }
            return ProbeOutcome::Unresponsive { count };
        };

        tracing::info!(target: "monitor", window = %reading.window, avg = reading.avg, "TPS reported");
        self.state.lock().unresponsive_count = 0;

        if !(config.restart_on_low_tps && reading.avg < config.tps_min) {
            return ProbeOutcome::Healthy(reading);
        }

        if self.cooldown_elapsed(config) {
            tracing::warn!(
                target: "monitor",
                avg = reading.avg,
                floor = config.tps_min,
                "Low TPS, restarting server"
            );
            self.restart();
            ProbeOutcome::LowTps {
                reading,
                restarted: true,
            }
        } else {
            tracing::info!(target: "monitor", avg = reading.avg, "Low TPS within restart cooldown");
            ProbeOutcome::LowTps {
                reading,
                restarted: false,
            }
        }
    }

    /// Poll captured output for a TPS line until `timeout` elapses
    fn await_reading(&self, timeout: Duration) -> Option<TpsReading> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if let Some(line) = self.process.poll_output_line(remaining) {
                if let Some(reading) = parse_tps(&line.text) {
                    return Some(reading);
                }
            }
        }
    }

    fn check_periodic_restart(&self, config: &MonitorConfig) -> bool {
        let Some(interval_ms) = config.periodic_interval_ms() else {
            return false;
        };
        let Some(marker) = self.marker.as_ref() else {
            return false;
        };

        let now = epoch_millis();
        let last = marker.read();
        if now.saturating_sub(last) < interval_ms {
            return false;
        }
        if !self.cooldown_elapsed(config) {
            tracing::info!(target: "monitor", "Periodic restart due but within restart cooldown");
            return false;
        }

        tracing::info!(target: "monitor", days = config.periodic_restart_days, "Periodic restart due");
        self.restart();
        if let Err(e) = marker.write(now) {
            tracing::error!(target: "monitor", path = %marker.path().display(), "Failed to persist restart marker: {}", e);
        }
        true
    }

    fn cooldown_elapsed(&self, config: &MonitorConfig) -> bool {
        self.state
            .lock()
            .last_restart
            .map_or(true, |at| at.elapsed() >= config.restart_cooldown())
    }

    /// Ask the server to stop through its console, force it if needed, start again
    fn restart(&self) {
        self.state.lock().last_restart = Some(Instant::now());

        self.process.send_command(STOP_COMMAND);
        self.process.wait_for_stop();
        if self.process.is_running() {
            tracing::warn!(target: "monitor", "Graceful stop failed, forcing");
            self.process.stop();
        }

        match self.process.start() {
            Ok(()) => tracing::info!(target: "monitor", "Restart completed"),
            Err(e) => tracing::error!(target: "monitor", "Restart failed to start server: {}", e),
        }
    }
}
