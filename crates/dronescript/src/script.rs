//! Flight script framework.
//!
//! A script is a [`FlightRoutine`] plus two optional callbacks: one for sensor
//! readings and one for camera frames. The [`Runner`] connects to the drone,
//! starts a monitor for each callback, runs the routine, and always cleans up.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dronescript::backend::SimulatedDrone;
//! use dronescript::script::{FlightContext, FlightRoutine, Runner, ScriptHooks};
//! use dronescript::state::SensorReading;
//! use dronescript::{Config, Result};
//!
//! struct Hop;
//!
//! #[async_trait::async_trait]
//! impl FlightRoutine for Hop {
//!     async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
//!         ctx.drone().takeoff(ctx.config().takeoff_timeout()).await?;
//!         ctx.drone().land(ctx.config().land_timeout()).await
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let config = Config::default();
//! let runner = Runner::new(Arc::new(SimulatedDrone::with_defaults()), &config);
//! let hooks = ScriptHooks::new(Hop).on_sensor(Arc::new(|reading: &SensorReading| {
//!     println!("{}", reading.position());
//!     Ok(())
//! }));
//! let report = runner.execute(hooks).await?;
//! println!("{} sensor events", report.sensor_events);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::DroneLink;
use crate::config::{Config, FlightConfig};
use crate::error::{Error, Result};
use crate::monitor::{
    EventCallback, MonitorHandle, MonitorManager, MonitorType, SensorMonitor, VisionMonitor,
};
use crate::state::{Frame, SensorReading};

/// Callback invoked once per new sensor reading.
pub type SensorCallback = EventCallback<SensorReading>;

/// Callback invoked once per new camera frame.
pub type VisionCallback = EventCallback<Frame>;

/// The primary control routine of a script.
#[async_trait::async_trait]
pub trait FlightRoutine: Send {
    /// Fly the drone. The link is already connected.
    ///
    /// # Errors
    ///
    /// Any error aborts the flight; the runner lands the drone if it is
    /// still airborne.
    async fn fly(&mut self, ctx: &FlightContext) -> Result<()>;
}

/// A routine together with its optional callbacks.
pub struct ScriptHooks<R> {
    routine: R,
    sensor: Option<SensorCallback>,
    vision: Option<VisionCallback>,
}

impl<R: FlightRoutine> ScriptHooks<R> {
    /// Start from a routine with no callbacks.
    pub fn new(routine: R) -> Self {
        Self {
            routine,
            sensor: None,
            vision: None,
        }
    }

    /// Set the sensor callback.
    #[must_use]
    pub fn on_sensor(mut self, callback: SensorCallback) -> Self {
        self.sensor = Some(callback);
        self
    }

    /// Set the vision callback.
    #[must_use]
    pub fn on_vision(mut self, callback: VisionCallback) -> Self {
        self.vision = Some(callback);
        self
    }

    /// Whether a sensor callback is set.
    pub fn has_sensor_callback(&self) -> bool {
        self.sensor.is_some()
    }

    /// Whether a vision callback is set.
    pub fn has_vision_callback(&self) -> bool {
        self.vision.is_some()
    }
}

impl<R> std::fmt::Debug for ScriptHooks<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHooks")
            .field("routine", &std::any::type_name::<R>())
            .field("sensor", &self.sensor.is_some())
            .field("vision", &self.vision.is_some())
            .finish()
    }
}

/// What the routine sees while flying.
pub struct FlightContext {
    link: Arc<dyn DroneLink>,
    config: FlightConfig,
    cancel: MonitorHandle,
}

impl FlightContext {
    /// The drone.
    pub fn drone(&self) -> &dyn DroneLink {
        self.link.as_ref()
    }

    /// A shared handle to the drone.
    pub fn link(&self) -> Arc<dyn DroneLink> {
        Arc::clone(&self.link)
    }

    /// Flight parameters.
    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    /// Whether the flight has been cancelled from outside.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.should_stop()
    }

    /// Poll `condition` every `poll` until it holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] naming `operation` if `timeout` elapses or the
    /// flight is cancelled first, or any error from `condition`.
    pub async fn wait_until<F>(
        &self,
        operation: &str,
        timeout: Duration,
        poll: Duration,
        mut condition: F,
    ) -> Result<()>
    where
        F: FnMut() -> Result<bool> + Send,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition()? {
                return Ok(());
            }
            if Instant::now() >= deadline || self.is_cancelled() {
                return Err(Error::timeout(operation));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for FlightContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightContext")
            .field("link", &self.link.name())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// How a flight ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightOutcome {
    /// The routine returned normally.
    Completed,
    /// The routine returned after the flight was cancelled.
    Cancelled,
}

impl std::fmt::Display for FlightOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightReport {
    /// How the flight ended.
    pub outcome: FlightOutcome,
    /// Sensor readings delivered to the sensor callback.
    pub sensor_events: u64,
    /// Frames delivered to the vision callback.
    pub vision_events: u64,
    /// Callback invocations that returned an error.
    pub callback_errors: u64,
    /// Wall time from connect to disconnect.
    pub elapsed: Duration,
}

/// Runs scripts against a drone link.
pub struct Runner {
    link: Arc<dyn DroneLink>,
    flight: FlightConfig,
    sensor_poll: Duration,
    vision_poll: Duration,
    vision_enabled: bool,
    cancel: MonitorHandle,
}

impl Runner {
    /// Create a runner for `link` using the given configuration.
    pub fn new(link: Arc<dyn DroneLink>, config: &Config) -> Self {
        Self {
            link,
            flight: config.flight.clone(),
            sensor_poll: config.sensor_poll_interval(),
            vision_poll: config.vision_poll_interval(),
            vision_enabled: config.vision.enabled,
            cancel: MonitorHandle::new(MonitorType::Routine),
        }
    }

    /// A handle that cancels the running flight when stopped.
    ///
    /// The handle is re-armed at the start of every [`Runner::execute`], so a
    /// stop only affects the flight in progress.
    pub fn cancel_handle(&self) -> MonitorHandle {
        self.cancel.clone()
    }

    /// Connect, run the script, and clean up.
    ///
    /// # Errors
    ///
    /// Returns an error if the drone cannot be connected, or the routine's
    /// error once the drone is down and disconnected.
    pub async fn execute<R: FlightRoutine>(&self, hooks: ScriptHooks<R>) -> Result<FlightReport> {
        let started = Instant::now();
        self.cancel.reset();
        let ScriptHooks {
            mut routine,
            sensor,
            vision,
        } = hooks;

        self.link.connect().await?;
        info!(link = self.link.name(), "Connected");

        let mut video_started = false;
        let vision = match vision {
            Some(cb) if self.vision_enabled => match self.link.start_video().await {
                Ok(()) => {
                    video_started = true;
                    Some(cb)
                }
                Err(e) => {
                    warn!(error = %e, "Could not start video, flying without vision");
                    None
                }
            },
            Some(_) => {
                debug!("Vision disabled, ignoring vision callback");
                None
            }
            None => None,
        };

        let mut monitors = MonitorManager::new();
        let spawned = self.spawn_monitors(&mut monitors, sensor, vision);

        let ctx = FlightContext {
            link: Arc::clone(&self.link),
            config: self.flight.clone(),
            cancel: self.cancel.clone(),
        };
        let result = match spawned {
            Ok(()) => routine.fly(&ctx).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!("Routine finished"),
            Err(e) => error!(error = %e, "Routine failed"),
        }
        self.land_if_airborne().await;

        let (mut sensor_events, mut vision_events, mut callback_errors) = (0, 0, 0);
        for status in monitors.join_all().await {
            match status {
                Ok(status) => {
                    match status.monitor_type {
                        MonitorType::Sensor => sensor_events = status.event_count,
                        MonitorType::Vision => vision_events = status.event_count,
                        MonitorType::Routine => {}
                    }
                    callback_errors += status.callback_errors;
                }
                Err(e) => warn!(error = %e, "Monitor did not stop cleanly"),
            }
        }

        if video_started {
            if let Err(e) = self.link.close_video().await {
                warn!(error = %e, "Failed to close video");
            }
        }
        if let Err(e) = self.link.disconnect().await {
            warn!(error = %e, "Failed to disconnect");
        }

        result?;

        let outcome = if self.cancel.should_stop() {
            FlightOutcome::Cancelled
        } else {
            FlightOutcome::Completed
        };
        let report = FlightReport {
            outcome,
            sensor_events,
            vision_events,
            callback_errors,
            elapsed: started.elapsed(),
        };
        info!(
            outcome = %report.outcome,
            sensor_events,
            vision_events,
            callback_errors,
            "Flight finished"
        );
        Ok(report)
    }

    fn spawn_monitors(
        &self,
        monitors: &mut MonitorManager,
        sensor: Option<SensorCallback>,
        vision: Option<VisionCallback>,
    ) -> Result<()> {
        if let Some(cb) = sensor {
            monitors
                .spawn(SensorMonitor::new(Arc::clone(&self.link)), self.sensor_poll, cb)
                .map_err(|e| Error::internal(e.to_string()))?;
        }
        if let Some(cb) = vision {
            monitors
                .spawn(VisionMonitor::new(Arc::clone(&self.link)), self.vision_poll, cb)
                .map_err(|e| Error::internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn land_if_airborne(&self) {
        match self.link.flying_state() {
            Ok(state) if state.is_airborne() => {
                warn!(state = %state, "Drone still airborne, landing");
                if let Err(e) = self.link.land(self.flight.land_timeout()).await {
                    error!(error = %e, "Safe landing failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not read flying state"),
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("link", &self.link.name())
            .field("vision_enabled", &self.vision_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::backend::{SimConfig, SimulatedDrone};
    use crate::state::FlyingState;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.sim = SimConfig {
            camera_width: 160,
            camera_height: 90,
            focal_px: 80.0,
            ..SimConfig::default()
        };
        config
    }

    fn drone(config: &Config) -> Arc<SimulatedDrone> {
        Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"))
    }

    struct Hop {
        hover: Duration,
    }

    #[async_trait::async_trait]
    impl FlightRoutine for Hop {
        async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
            ctx.drone().takeoff(ctx.config().takeoff_timeout()).await?;
            ctx.drone().smart_sleep(self.hover).await?;
            ctx.drone().land(ctx.config().land_timeout()).await
        }
    }

    struct Crash;

    #[async_trait::async_trait]
    impl FlightRoutine for Crash {
        async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
            ctx.drone().takeoff(ctx.config().takeoff_timeout()).await?;
            Err(Error::mission("crash", "lost the plot"))
        }
    }

    fn counter() -> (Arc<AtomicU64>, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (Arc::clone(&count), count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_only() {
        let config = test_config();
        let sim = drone(&config);
        let runner = Runner::new(sim.clone(), &config);

        let hooks = ScriptHooks::new(Hop {
            hover: Duration::from_secs(1),
        });
        assert!(!hooks.has_sensor_callback());
        assert!(!hooks.has_vision_callback());

        let report = runner.execute(hooks).await.unwrap();
        assert_eq!(report.outcome, FlightOutcome::Completed);
        assert_eq!(report.sensor_events, 0);
        assert_eq!(report.vision_events, 0);
        assert!(!sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_receive_events() {
        let config = test_config();
        let sim = drone(&config);
        let runner = Runner::new(sim.clone(), &config);

        let (sensor_seen, sensor_count) = counter();
        let (frame_seen, frame_count) = counter();
        let hooks = ScriptHooks::new(Hop {
            hover: Duration::from_secs(2),
        })
        .on_sensor(Arc::new(move |_reading: &SensorReading| {
            sensor_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .on_vision(Arc::new(move |_frame: &Frame| {
            frame_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let report = runner.execute(hooks).await.unwrap();
        assert!(report.sensor_events > 10, "{report:?}");
        assert!(report.vision_events > 10, "{report:?}");
        assert_eq!(report.sensor_events, sensor_count.load(Ordering::SeqCst));
        assert_eq!(report.vision_events, frame_count.load(Ordering::SeqCst));
        assert_eq!(report.callback_errors, 0);
        assert!(sim.latest_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vision_disabled_skips_callback() {
        let mut config = test_config();
        config.vision.enabled = false;
        let runner = Runner::new(drone(&config), &config);

        let hooks = ScriptHooks::new(Hop {
            hover: Duration::from_secs(1),
        })
        .on_vision(Arc::new(|_frame: &Frame| -> Result<()> {
            panic!("vision callback must not run");
        }));

        let report = runner.execute(hooks).await.unwrap();
        assert_eq!(report.vision_events, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_errors_do_not_abort() {
        let config = test_config();
        let runner = Runner::new(drone(&config), &config);

        let hooks = ScriptHooks::new(Hop {
            hover: Duration::from_secs(1),
        })
        .on_sensor(Arc::new(|_reading: &SensorReading| -> Result<()> {
            Err(Error::vision("always fails"))
        }));

        let report = runner.execute(hooks).await.unwrap();
        assert_eq!(report.outcome, FlightOutcome::Completed);
        assert!(report.callback_errors > 0);
        assert_eq!(report.callback_errors, report.sensor_events);
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_error_lands_and_disconnects() {
        let config = test_config();
        let sim = drone(&config);
        let runner = Runner::new(sim.clone(), &config);

        let err = runner.execute(ScriptHooks::new(Crash)).await.unwrap_err();
        assert!(matches!(err, Error::Mission { .. }));
        assert!(!sim.is_connected());

        // Reconnect to inspect the final state
        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Landed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_returned() {
        let config = test_config();
        let sim = drone(&config);
        sim.connect().await.unwrap();

        let runner = Runner::new(sim.clone(), &config);
        let err = runner
            .execute(ScriptHooks::new(Hop {
                hover: Duration::ZERO,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_flight() {
        struct WaitForCancel;

        #[async_trait::async_trait]
        impl FlightRoutine for WaitForCancel {
            async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
                while !ctx.is_cancelled() {
                    ctx.drone().smart_sleep(Duration::from_millis(50)).await?;
                }
                Ok(())
            }
        }

        let config = test_config();
        let runner = Runner::new(drone(&config), &config);
        let cancel = runner.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.stop();
        });

        let report = runner.execute(ScriptHooks::new(WaitForCancel)).await.unwrap();
        assert_eq!(report.outcome, FlightOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_flies_again_after_cancel() {
        let config = test_config();
        let sim = drone(&config);
        let runner = Runner::new(sim.clone(), &config);

        runner.cancel_handle().stop();
        let report = runner
            .execute(ScriptHooks::new(Hop {
                hover: Duration::from_secs(1),
            }))
            .await
            .unwrap();
        assert_eq!(report.outcome, FlightOutcome::Completed);

        let cancel = runner.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.stop();
        });
        let report = runner
            .execute(ScriptHooks::new(Hop {
                hover: Duration::from_secs(1),
            }))
            .await
            .unwrap();
        assert_eq!(report.outcome, FlightOutcome::Cancelled);

        let report = runner
            .execute(ScriptHooks::new(Hop {
                hover: Duration::from_secs(1),
            }))
            .await
            .unwrap();
        assert_eq!(report.outcome, FlightOutcome::Completed);
        assert!(!sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let config = test_config();
        let ctx = FlightContext {
            link: drone(&config),
            config: config.flight.clone(),
            cancel: MonitorHandle::new(MonitorType::Routine),
        };

        let err = ctx
            .wait_until("never", Duration::from_millis(200), Duration::from_millis(50), || {
                Ok(false)
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let mut calls = 0;
        ctx.wait_until("third time", Duration::from_secs(1), Duration::from_millis(50), || {
            calls += 1;
            Ok(calls == 3)
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
    }
}
