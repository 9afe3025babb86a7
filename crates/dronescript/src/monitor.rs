//! Polling monitors.
//!
//! A monitor polls the drone link on a fixed interval and hands every new
//! sensor reading or camera frame to a callback. Each monitor runs as its own
//! tokio task and is stopped through a cloneable [`MonitorHandle`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::backend::DroneLink;
use crate::state::{Frame, SensorReading};

/// Errors that can occur while managing monitors.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A monitor of this type is already running.
    #[error("{0} monitor already running")]
    AlreadyRunning(MonitorType),

    /// No monitor of this type is running.
    #[error("{0} monitor not running")]
    NotRunning(MonitorType),

    /// The monitor task panicked or was aborted.
    #[error("{monitor_type} monitor task failed: {message}")]
    TaskFailed {
        /// Which monitor failed.
        monitor_type: MonitorType,
        /// Join error description.
        message: String,
    },
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A callback invoked once per new event.
pub type EventCallback<E> = Arc<dyn Fn(&E) -> crate::Result<()> + Send + Sync>;

/// What a monitor watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorType {
    /// Sensor readings.
    Sensor,

    /// Camera frames.
    Vision,

    /// The flight routine itself (cancellation only).
    Routine,
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Vision => write!(f, "vision"),
            Self::Routine => write!(f, "routine"),
        }
    }
}

/// Snapshot of a monitor's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    /// The type of monitor.
    pub monitor_type: MonitorType,

    /// Whether the monitor loop is currently running.
    pub is_running: bool,

    /// Number of events delivered to the callback.
    pub event_count: u64,

    /// Number of callback invocations that returned an error.
    pub callback_errors: u64,

    /// Number of failed polls of the drone link.
    pub poll_errors: u64,
}

impl MonitorStatus {
    /// Status of a monitor that never ran.
    #[must_use]
    pub fn stopped(monitor_type: MonitorType) -> Self {
        Self {
            monitor_type,
            is_running: false,
            event_count: 0,
            callback_errors: 0,
            poll_errors: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    running: AtomicBool,
    events: AtomicU64,
    callback_errors: AtomicU64,
    poll_errors: AtomicU64,
}

/// A handle to control a monitor.
///
/// This is a lightweight, cloneable handle that can be used to stop a monitor
/// and read its counters from other tasks.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    monitor_type: MonitorType,
    stop_signal: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl MonitorHandle {
    /// Create a new monitor handle.
    #[must_use]
    pub fn new(monitor_type: MonitorType) -> Self {
        Self {
            monitor_type,
            stop_signal: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get the monitor type.
    #[must_use]
    pub fn monitor_type(&self) -> MonitorType {
        self.monitor_type
    }

    /// Signal the monitor to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            monitor_type: self.monitor_type,
            is_running: self.counters.running.load(Ordering::SeqCst),
            event_count: self.counters.events.load(Ordering::SeqCst),
            callback_errors: self.counters.callback_errors.load(Ordering::SeqCst),
            poll_errors: self.counters.poll_errors.load(Ordering::SeqCst),
        }
    }
}

/// Something a monitor can poll for new events.
pub trait ChangeSource: Send + 'static {
    /// Event type handed to the callback.
    type Event: Send + 'static;

    /// The type of this monitor.
    fn monitor_type(&self) -> MonitorType;

    /// Poll once. Returns `Some` only when the event differs from the last one.
    ///
    /// # Errors
    ///
    /// Returns an error if the drone link cannot be read.
    fn check_for_changes(&mut self) -> crate::Result<Option<Self::Event>>;
}

/// Polls the drone's sensors for new readings.
pub struct SensorMonitor {
    link: Arc<dyn DroneLink>,
    last_seen: Option<(u64, DateTime<Utc>)>,
}

impl SensorMonitor {
    /// Create a sensor monitor for the given link.
    #[must_use]
    pub fn new(link: Arc<dyn DroneLink>) -> Self {
        Self {
            link,
            last_seen: None,
        }
    }
}

impl std::fmt::Debug for SensorMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorMonitor")
            .field("link", &self.link.name())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl ChangeSource for SensorMonitor {
    type Event = SensorReading;

    fn monitor_type(&self) -> MonitorType {
        MonitorType::Sensor
    }

    fn check_for_changes(&mut self) -> crate::Result<Option<SensorReading>> {
        let reading = self.link.sensors()?;
        let key = (reading.speed_ts, reading.timestamp);
        if self.last_seen == Some(key) {
            trace!("Sensor reading unchanged");
            return Ok(None);
        }
        self.last_seen = Some(key);
        Ok(Some(reading))
    }
}

/// Polls the drone's camera for new frames.
pub struct VisionMonitor {
    link: Arc<dyn DroneLink>,
    last_seq: Option<u64>,
}

impl VisionMonitor {
    /// Create a vision monitor for the given link.
    #[must_use]
    pub fn new(link: Arc<dyn DroneLink>) -> Self {
        Self {
            link,
            last_seq: None,
        }
    }
}

impl std::fmt::Debug for VisionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionMonitor")
            .field("link", &self.link.name())
            .field("last_seq", &self.last_seq)
            .finish()
    }
}

impl ChangeSource for VisionMonitor {
    type Event = Frame;

    fn monitor_type(&self) -> MonitorType {
        MonitorType::Vision
    }

    fn check_for_changes(&mut self) -> crate::Result<Option<Frame>> {
        let Some(frame) = self.link.latest_frame() else {
            return Ok(None);
        };
        if self.last_seq == Some(frame.seq) {
            trace!(seq = frame.seq, "Frame unchanged");
            return Ok(None);
        }
        self.last_seq = Some(frame.seq);
        Ok(Some(frame))
    }
}

/// Run a monitor loop until its handle is stopped.
async fn run_monitor<S: ChangeSource>(
    mut source: S,
    poll_interval: Duration,
    callback: EventCallback<S::Event>,
    handle: MonitorHandle,
) -> MonitorStatus {
    let monitor_type = source.monitor_type();
    let counters = Arc::clone(&handle.counters);
    counters.running.store(true, Ordering::SeqCst);
    debug!(
        monitor = %monitor_type,
        interval_ms = poll_interval.as_millis(),
        "Starting monitor"
    );

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !handle.should_stop() {
        ticker.tick().await;
        if handle.should_stop() {
            break;
        }

        match source.check_for_changes() {
            Ok(Some(event)) => {
                counters.events.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = callback(&event) {
                    counters.callback_errors.fetch_add(1, Ordering::SeqCst);
                    warn!(monitor = %monitor_type, error = %e, "Callback failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                counters.poll_errors.fetch_add(1, Ordering::SeqCst);
                warn!(monitor = %monitor_type, error = %e, "Error polling drone");
            }
        }
    }

    counters.running.store(false, Ordering::SeqCst);
    let status = handle.status();
    debug!(
        monitor = %monitor_type,
        events = status.event_count,
        "Monitor stopped"
    );
    status
}

/// A collection of monitors that can be managed together.
#[derive(Debug, Default)]
pub struct MonitorManager {
    monitors: Vec<(MonitorHandle, JoinHandle<MonitorStatus>)>,
}

impl MonitorManager {
    /// Create a new monitor manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor task polling `source` every `poll_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyRunning`] if a monitor of the same type
    /// is already managed.
    pub fn spawn<S: ChangeSource>(
        &mut self,
        source: S,
        poll_interval: Duration,
        callback: EventCallback<S::Event>,
    ) -> Result<MonitorHandle> {
        let monitor_type = source.monitor_type();
        if self
            .monitors
            .iter()
            .any(|(h, _)| h.monitor_type() == monitor_type)
        {
            return Err(MonitorError::AlreadyRunning(monitor_type));
        }

        let handle = MonitorHandle::new(monitor_type);
        let task = tokio::spawn(run_monitor(
            source,
            poll_interval,
            callback,
            handle.clone(),
        ));
        self.monitors.push((handle.clone(), task));
        Ok(handle)
    }

    /// Stop one monitor.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NotRunning`] if no such monitor is managed.
    pub fn stop(&self, monitor_type: MonitorType) -> Result<()> {
        let (handle, _) = self
            .monitors
            .iter()
            .find(|(h, _)| h.monitor_type() == monitor_type)
            .ok_or(MonitorError::NotRunning(monitor_type))?;
        handle.stop();
        Ok(())
    }

    /// Stop all monitors.
    pub fn stop_all(&self) {
        for (handle, _) in &self.monitors {
            handle.stop();
        }
    }

    /// Get the number of managed monitors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.monitors.len()
    }

    /// Check if any monitors are still running (haven't been signaled to stop).
    #[must_use]
    pub fn any_running(&self) -> bool {
        self.monitors.iter().any(|(h, _)| !h.should_stop())
    }

    /// Stop every monitor and wait for its task to finish.
    ///
    /// Returns one result per monitor, in spawn order.
    pub async fn join_all(self) -> Vec<Result<MonitorStatus>> {
        self.stop_all();
        let mut results = Vec::with_capacity(self.monitors.len());
        for (handle, task) in self.monitors {
            let result = task.await.map_err(|e| MonitorError::TaskFailed {
                monitor_type: handle.monitor_type(),
                message: e.to_string(),
            });
            results.push(result);
        }
        results
    }
}
