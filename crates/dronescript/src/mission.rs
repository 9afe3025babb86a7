//! Target detection mission.
//!
//! The drone takes off, climbs until the camera sees the orange target at
//! close range, notes its estimated position, then flies clear and lands.
//! The noted position is the firing position handed to a second drone.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ClimbMode, Config, ControlConfig, FlightConfig};
use crate::control::PositionController;
use crate::error::{Error, Result};
use crate::estimation::{EstimatorTuning, PositionEstimator};
use crate::script::{FlightContext, FlightRoutine, ScriptHooks};
use crate::state::{FlyingState, Frame, PilotCommand, Position, SensorReading};
use crate::storage::{export, DetectionRecord, Storage};
use crate::vision::{BoundingBox, TargetDetector};

const MISSION_NAME: &str = "detection";

/// Poll period for the calibration and first-estimate waits.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// What the mission found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionOutcome {
    /// Whether the target was seen close enough.
    pub target_acquired: bool,
    /// Estimated position when the target was acquired.
    pub firing_position: Option<Position>,
    /// Bounding box of the target in the acquiring frame.
    pub bbox: Option<BoundingBox>,
    /// When the target was acquired.
    pub detected_at: Option<DateTime<Utc>>,
    /// The drone went into emergency during takeoff.
    pub emergency: bool,
}

impl MissionOutcome {
    /// Short label stored in the mission log.
    #[must_use]
    pub fn label(&self) -> &'static str {
        if self.emergency {
            "emergency"
        } else if self.target_acquired {
            "target_acquired"
        } else {
            "no_target"
        }
    }
}

#[derive(Debug)]
struct MissionState {
    measuring: bool,
    estimator: Option<PositionEstimator>,
    current_state: Option<Position>,
    controller: PositionController,
    target_acquired: bool,
    firing_position: Option<Position>,
    bbox: Option<BoundingBox>,
    detected_at: Option<DateTime<Utc>>,
    emergency: bool,
}

/// The detection mission: flight routine plus sensor and vision callbacks.
///
/// Clones share state, so one clone can be handed to the runner while
/// another reads the outcome afterwards.
#[derive(Debug, Clone)]
pub struct DetectionMission {
    flight: FlightConfig,
    tuning: EstimatorTuning,
    detector: TargetDetector,
    state: Arc<Mutex<MissionState>>,
}

impl DetectionMission {
    /// Build a mission from the application configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let tuning = EstimatorTuning {
            dt: config.sensor_poll_interval().as_secs_f64(),
            ..EstimatorTuning::default()
        };
        Self::with_parts(
            config.flight.clone(),
            &config.control,
            tuning,
            TargetDetector::from_config(&config.vision),
        )
    }

    /// Build a mission from individual parts.
    #[must_use]
    pub fn with_parts(
        flight: FlightConfig,
        control: &ControlConfig,
        tuning: EstimatorTuning,
        detector: TargetDetector,
    ) -> Self {
        let state = MissionState {
            measuring: false,
            estimator: None,
            current_state: None,
            controller: PositionController::new(control, tuning.dt),
            target_acquired: false,
            firing_position: None,
            bbox: None,
            detected_at: None,
            emergency: false,
        };
        Self {
            flight,
            tuning,
            detector,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Wire the routine and both callbacks into script hooks.
    #[must_use]
    pub fn hooks(&self) -> ScriptHooks<Self> {
        let on_sensor = self.clone();
        let on_vision = self.clone();
        ScriptHooks::new(self.clone())
            .on_sensor(Arc::new(move |reading: &SensorReading| {
                on_sensor.handle_sensor(reading)
            }))
            .on_vision(Arc::new(move |frame: &Frame| on_vision.handle_frame(frame)))
    }

    /// What the mission has found so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the mission state is poisoned.
    pub fn outcome(&self) -> Result<MissionOutcome> {
        let state = self.lock()?;
        Ok(MissionOutcome {
            target_acquired: state.target_acquired,
            firing_position: state.firing_position,
            bbox: state.bbox,
            detected_at: state.detected_at,
            emergency: state.emergency,
        })
    }

    /// Latest estimated position.
    ///
    /// # Errors
    ///
    /// Returns an error if the mission state is poisoned.
    pub fn current_state(&self) -> Result<Option<Position>> {
        Ok(self.lock()?.current_state)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MissionState>> {
        self.state
            .lock()
            .map_err(|_| Error::mission(MISSION_NAME, "mission state poisoned"))
    }

    /// Sensor callback: estimate the position once measuring has started.
    fn handle_sensor(&self, reading: &SensorReading) -> Result<()> {
        let mut state = self.lock()?;
        if !state.measuring {
            return Ok(());
        }

        let measured = reading.position();
        let estimate = match state.estimator.as_mut() {
            Some(estimator) => estimator.estimate(measured, reading.speed)?,
            None => {
                debug!(position = %measured, "Starting estimator");
                state.estimator = Some(PositionEstimator::new(
                    measured,
                    reading.speed,
                    self.tuning,
                )?);
                measured
            }
        };

        state.current_state = Some(estimate);
        state.controller.set_current_state(estimate);
        Ok(())
    }

    /// Vision callback: look for the target until it is acquired.
    fn handle_frame(&self, frame: &Frame) -> Result<()> {
        if self.lock()?.target_acquired {
            return Ok(());
        }

        // Segment outside the lock
        let Some(detection) = self.detector.detect(frame) else {
            return Ok(());
        };

        let mut state = self.lock()?;
        if state.target_acquired {
            return Ok(());
        }
        let Some(position) = state.current_state else {
            debug!(seq = frame.seq, "Target seen before the first estimate, ignoring");
            return Ok(());
        };

        state.target_acquired = true;
        state.firing_position = Some(position);
        state.bbox = Some(detection.bbox);
        state.detected_at = Some(frame.captured_at);
        info!(
            position = %position,
            area = detection.bbox.area(),
            seq = frame.seq,
            "Target detected"
        );
        Ok(())
    }

    fn target_acquired(&self) -> Result<bool> {
        Ok(self.lock()?.target_acquired)
    }

    fn altitude(&self) -> Result<f64> {
        self.lock()?
            .current_state
            .map(|p| p.z)
            .ok_or_else(|| Error::mission(MISSION_NAME, "no position estimate"))
    }

    /// Wait for the sensors, start measuring and wait for the first estimate.
    async fn start_measuring(&self, ctx: &FlightContext) -> Result<Position> {
        let drone = ctx.drone();
        info!("Waiting for sensor calibration");
        ctx.wait_until("sensor calibration", self.flight.sensor_wait(), WAIT_POLL, || {
            Ok(drone.sensors()?.is_calibrated())
        })
        .await?;
        self.lock()?.measuring = true;

        info!("Waiting for the first state estimate");
        ctx.wait_until("first state estimate", self.flight.sensor_wait(), WAIT_POLL, || {
            Ok(self.lock()?.current_state.is_some())
        })
        .await?;
        self.lock()?
            .current_state
            .ok_or_else(|| Error::mission(MISSION_NAME, "no position estimate"))
    }

    /// Fly towards `desired` with the position controller.
    ///
    /// Returns `true` once within `eps`, `false` if the ceiling or the
    /// distance limit is hit, the target is acquired, or the flight is
    /// cancelled.
    async fn go_to(&self, ctx: &FlightContext, desired: Position) -> Result<bool> {
        self.lock()?.controller.set_desired_state(desired);
        debug!(desired = %desired, "Flying to setpoint");

        loop {
            let cmd = {
                let mut state = self.lock()?;
                let distance = state
                    .controller
                    .distance_to_goal()
                    .ok_or_else(|| Error::mission(MISSION_NAME, "no position estimate"))?;
                if distance <= self.flight.eps {
                    return Ok(true);
                }
                if state.target_acquired || ctx.is_cancelled() {
                    return Ok(false);
                }
                state.controller.calculate_cmd_input()
            };
            ctx.drone().fly_direct(cmd).await?;

            let (distance, z) = {
                let state = self.lock()?;
                let distance = state.controller.distance_to_goal().unwrap_or(f64::INFINITY);
                (distance, state.current_state.map_or(0.0, |p| p.z))
            };
            if z >= self.flight.max_altitude || distance >= self.flight.max_distance {
                warn!(z, distance, "Leaving setpoint: limit reached");
                return Ok(false);
            }
        }
    }

    /// Climb with fixed power until the target shows up or the ceiling is hit.
    async fn direct_climb(&self, ctx: &FlightContext) -> Result<bool> {
        let climb = PilotCommand::new(0.0, 0.0, 0.0, f64::from(self.flight.climb_power));
        while !self.target_acquired()? && self.altitude()? <= self.flight.max_altitude {
            if ctx.is_cancelled() {
                break;
            }
            ctx.drone().fly_direct(climb).await?;
        }
        self.target_acquired()
    }

    /// Raise the setpoint step by step until the target shows up or the
    /// ceiling is hit.
    async fn controlled_climb(&self, ctx: &FlightContext, start: Position) -> Result<bool> {
        let mut desired = start;
        while !self.target_acquired()? && self.altitude()? <= self.flight.max_altitude {
            if ctx.is_cancelled() {
                break;
            }
            desired = Position::new(0.0, 0.0, desired.z + self.flight.climb_step);
            self.go_to(ctx, desired).await?;
        }
        self.target_acquired()
    }

    async fn search(&self, ctx: &FlightContext) -> Result<()> {
        let start = self.start_measuring(ctx).await?;
        self.lock()?.controller.set_desired_state(start);

        info!(mode = %self.flight.climb_mode, from = %start, "Climbing");
        let found = match self.flight.climb_mode {
            ClimbMode::Direct => self.direct_climb(ctx).await?,
            ClimbMode::Controlled => self.controlled_climb(ctx, start).await?,
        };
        if found {
            info!("Target acquired, holding");
        } else {
            warn!(ceiling = self.flight.max_altitude, "Target not found");
        }

        ctx.drone().smart_sleep(self.flight.hover_after_climb()).await
    }

    /// Move back and to the side so the landing is clear of the target.
    async fn fly_away(&self, ctx: &FlightContext) -> Result<()> {
        if ctx.drone().flying_state()? == FlyingState::Emergency {
            warn!("Drone in emergency, skipping fly-away");
            return Ok(());
        }
        let cmd = PilotCommand::new(
            f64::from(self.flight.fly_away_roll),
            f64::from(self.flight.fly_away_pitch),
            0.0,
            0.0,
        )
        .for_duration(self.flight.fly_away_duration());
        debug!(?cmd, "Flying away");
        ctx.drone().fly_direct(cmd).await
    }
}

#[async_trait::async_trait]
impl FlightRoutine for DetectionMission {
    async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
        info!("Taking off");
        ctx.drone().takeoff(self.flight.takeoff_timeout()).await?;

        if ctx.drone().flying_state()? == FlyingState::Emergency {
            warn!("Emergency after takeoff, skipping search");
            self.lock()?.emergency = true;
        } else {
            self.search(ctx).await?;
        }

        self.fly_away(ctx).await?;
        info!("Landing");
        ctx.drone().land(self.flight.land_timeout()).await
    }
}

/// Mission log label for a flight whose routine or cleanup returned an error.
pub const FAILED_LABEL: &str = "failed";

/// Persist a finished mission: firing position file and mission log.
///
/// The mission row is closed with `label`, normally [`MissionOutcome::label`]
/// or [`FAILED_LABEL`]. An acquired target is saved either way.
///
/// Returns the detection ID when a target was recorded.
///
/// # Errors
///
/// Returns an error if the file or the database cannot be written.
pub fn record_outcome(
    storage: &Storage,
    mission_id: i64,
    outcome: &MissionOutcome,
    label: &str,
    target_file: &Path,
) -> Result<Option<i64>> {
    let detection_id = match (outcome.target_acquired, outcome.firing_position) {
        (true, Some(position)) => {
            export::write_firing_position(target_file, &position)?;
            info!(path = %target_file.display(), position = %position, "Firing position saved");

            let mut record =
                DetectionRecord::new(mission_id, position, outcome.bbox.map_or(0, |b| b.area()));
            if let Some(at) = outcome.detected_at {
                record.timestamp = at;
            }
            Some(storage.record_detection(&record)?)
        }
        _ => None,
    };
    storage.finish_mission(mission_id, label)?;
    Ok(detection_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DroneLink, SimConfig, SimulatedDrone};
    use crate::script::Runner;
    use crate::state::Velocity;

    fn test_config(mode: ClimbMode) -> Config {
        let mut config = Config::default();
        config.flight.climb_mode = mode;
        config.sim = SimConfig {
            camera_width: 160,
            camera_height: 90,
            focal_px: 80.0,
            ..SimConfig::default()
        };
        // 64 px square at one metre
        config.vision.area_threshold = 3_500;
        config
    }

    async fn fly(config: &Config) -> (MissionOutcome, Arc<SimulatedDrone>) {
        crate::logging::init_test_logging();
        let sim = Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"));
        let mission = DetectionMission::new(config);
        let runner = Runner::new(sim.clone(), config);
        let report = runner.execute(mission.hooks()).await.unwrap();
        assert!(report.sensor_events > 0);
        (mission.outcome().unwrap(), sim)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_climb_finds_target() {
        let config = test_config(ClimbMode::Direct);
        let (outcome, sim) = fly(&config).await;

        assert!(outcome.target_acquired, "{outcome:?}");
        assert_eq!(outcome.label(), "target_acquired");
        let z = outcome.firing_position.unwrap().z;
        assert!((1.4..1.7).contains(&z), "firing z = {z}");
        assert!(outcome.bbox.unwrap().area() >= 3_500);

        // Landed clear of the target
        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Landed);
        let p = sim.true_position().unwrap();
        assert!(p[0] < -1.0 && p[1] > 1.0, "landed at {p:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_controlled_climb_finds_target() {
        let config = test_config(ClimbMode::Controlled);
        let (outcome, _) = fly(&config).await;

        assert!(outcome.target_acquired, "{outcome:?}");
        let z = outcome.firing_position.unwrap().z;
        assert!((1.4..1.75).contains(&z), "firing z = {z}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_out_of_reach() {
        let mut config = test_config(ClimbMode::Direct);
        config.sim.target = [1.0, 0.0, 5.0];
        config.flight.climb_power = 80;
        config.flight.land_timeout_secs = 10;
        let (outcome, _) = fly(&config).await;

        assert!(!outcome.target_acquired);
        assert!(outcome.firing_position.is_none());
        assert_eq!(outcome.label(), "no_target");
    }

    #[tokio::test(start_paused = true)]
    async fn test_controlled_climb_out_of_reach() {
        let mut config = test_config(ClimbMode::Controlled);
        config.sim.target = [1.0, 0.0, 5.0];
        config.flight.land_timeout_secs = 10;
        let (outcome, sim) = fly(&config).await;

        assert!(!outcome.target_acquired);
        assert_eq!(outcome.label(), "no_target");
        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Landed);
    }

    /// Takes off, starts measuring and flies to `start + offset` with
    /// `go_to`, without vision.
    struct Setpoint {
        mission: DetectionMission,
        offset: [f64; 3],
        reached: Arc<Mutex<Option<bool>>>,
    }

    #[async_trait::async_trait]
    impl FlightRoutine for Setpoint {
        async fn fly(&mut self, ctx: &FlightContext) -> Result<()> {
            ctx.drone().takeoff(ctx.config().takeoff_timeout()).await?;
            let start = self.mission.start_measuring(ctx).await?;
            let [dx, dy, dz] = self.offset;
            let reached = self.mission.go_to(ctx, start.offset(dx, dy, dz)).await?;
            *self.reached.lock().unwrap() = Some(reached);
            ctx.drone().land(ctx.config().land_timeout()).await
        }
    }

    async fn fly_setpoint(config: &Config, offset: [f64; 3]) -> (bool, Position) {
        crate::logging::init_test_logging();
        let sim = Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"));
        let mission = DetectionMission::new(config);
        let reached = Arc::new(Mutex::new(None));
        let on_sensor = mission.clone();
        let hooks = ScriptHooks::new(Setpoint {
            mission: mission.clone(),
            offset,
            reached: Arc::clone(&reached),
        })
        .on_sensor(Arc::new(move |reading: &SensorReading| {
            on_sensor.handle_sensor(reading)
        }));

        Runner::new(sim, config).execute(hooks).await.unwrap();
        let reached = reached.lock().unwrap().expect("go_to did not return");
        (reached, mission.current_state().unwrap().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_to_stops_at_distance_limit() {
        let config = test_config(ClimbMode::Controlled);
        let (reached, last) = fly_setpoint(&config, [5.0, 0.0, 0.0]).await;

        assert!(!reached);
        // Gave up after one command instead of chasing the setpoint
        assert!(last.x < 1.0, "last estimate {last}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_to_stops_at_ceiling() {
        let mut config = test_config(ClimbMode::Controlled);
        config.flight.max_altitude = 1.4;
        let (reached, _) = fly_setpoint(&config, [0.0, 0.0, 1.0]).await;

        assert!(!reached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_during_climb_fails_flight() {
        crate::logging::init_test_logging();
        let config = test_config(ClimbMode::Direct);
        let dir = tempfile::tempdir().unwrap();
        let target_file = dir.path().join("shoot_here.csv");
        let storage = Storage::open_in_memory().unwrap();
        let mission_id = storage.begin_mission("sim", ClimbMode::Direct).unwrap();

        let sim = Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"));
        let cutter = Arc::clone(&sim);
        tokio::spawn(async move {
            // Cut the motors as soon as the climb starts
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if matches!(cutter.flying_state(), Ok(FlyingState::Flying)) {
                    cutter.force_emergency().unwrap();
                    break;
                }
            }
        });

        let mission = DetectionMission::new(&config);
        let runner = Runner::new(sim.clone(), &config);
        let err = runner.execute(mission.hooks()).await.unwrap_err();
        assert!(matches!(err, Error::Emergency { .. }), "{err}");
        assert!(!sim.is_connected());

        let outcome = mission.outcome().unwrap();
        assert!(!outcome.target_acquired);
        assert!(record_outcome(&storage, mission_id, &outcome, FAILED_LABEL, &target_file)
            .unwrap()
            .is_none());
        assert!(!target_file.exists());
        let logged = storage.get_mission(mission_id).unwrap().unwrap();
        assert_eq!(logged.outcome.as_deref(), Some(FAILED_LABEL));

        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_landing_keeps_target() {
        crate::logging::init_test_logging();
        let mut config = test_config(ClimbMode::Direct);
        config.flight.land_timeout_secs = 1;
        let dir = tempfile::tempdir().unwrap();
        let target_file = dir.path().join("shoot_here.csv");
        let storage = Storage::open_in_memory().unwrap();
        let mission_id = storage.begin_mission("sim", ClimbMode::Direct).unwrap();

        let sim = Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"));
        let mission = DetectionMission::new(&config);
        let runner = Runner::new(sim, &config);
        let err = runner.execute(mission.hooks()).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");

        let outcome = mission.outcome().unwrap();
        assert!(outcome.target_acquired, "{outcome:?}");
        let id = record_outcome(&storage, mission_id, &outcome, FAILED_LABEL, &target_file)
            .unwrap()
            .unwrap();

        assert!(target_file.exists());
        assert_eq!(
            Some(export::read_firing_position(&target_file).unwrap()),
            outcome.firing_position
        );
        assert_eq!(storage.get_detection(id).unwrap().unwrap().mission_id, mission_id);
        let logged = storage.get_mission(mission_id).unwrap().unwrap();
        assert_eq!(logged.outcome.as_deref(), Some(FAILED_LABEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_skips_search() {
        let mut config = test_config(ClimbMode::Direct);
        config.sim.fail_takeoff = true;
        let (outcome, sim) = fly(&config).await;

        assert!(outcome.emergency);
        assert!(!outcome.target_acquired);
        assert_eq!(outcome.label(), "emergency");
        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_timeout_fails_mission() {
        let mut config = test_config(ClimbMode::Direct);
        config.sim.calibration_ms = 60_000;
        config.flight.sensor_wait_ms = 1_000;

        let sim = Arc::new(SimulatedDrone::new(config.sim.clone(), "sim"));
        let mission = DetectionMission::new(&config);
        let runner = Runner::new(sim.clone(), &config);
        let err = runner.execute(mission.hooks()).await.unwrap_err();
        assert!(err.is_timeout());

        // The runner still brought it down
        sim.connect().await.unwrap();
        assert_eq!(sim.flying_state().unwrap(), FlyingState::Landed);
    }

    #[test]
    fn test_sensor_callback_idle_until_measuring() {
        let mission = DetectionMission::new(&Config::default());
        let reading = SensorReading {
            position_cm: [10.0, 0.0, -100.0],
            speed_ts: 1,
            ..SensorReading::default()
        };

        mission.handle_sensor(&reading).unwrap();
        assert!(mission.current_state().unwrap().is_none());

        mission.lock().unwrap().measuring = true;
        mission.handle_sensor(&reading).unwrap();
        let p = mission.current_state().unwrap().unwrap();
        assert!((p.z - 1.0).abs() < 1e-9);

        mission
            .handle_sensor(&SensorReading {
                speed: Velocity::new(0.0, 0.0, 0.1),
                ..reading
            })
            .unwrap();
        assert!(mission.current_state().unwrap().is_some());
    }

    #[test]
    fn test_vision_callback_needs_an_estimate() {
        use image::{Rgb, RgbImage};

        let mission = DetectionMission::with_parts(
            FlightConfig::default(),
            &ControlConfig::default(),
            EstimatorTuning::default(),
            TargetDetector::new(crate::vision::HsvRange::default(), 100),
        );
        let mut image = RgbImage::from_pixel(40, 40, Rgb([110, 140, 170]));
        for y in 10..30 {
            for x in 10..30 {
                image.put_pixel(x, y, Rgb([255, 128, 0]));
            }
        }
        let frame = Frame::new(1, image);

        mission.handle_frame(&frame).unwrap();
        assert!(!mission.outcome().unwrap().target_acquired);

        mission.lock().unwrap().current_state = Some(Position::new(0.0, 0.0, 1.5));
        mission.handle_frame(&frame).unwrap();
        let outcome = mission.outcome().unwrap();
        assert!(outcome.target_acquired);
        assert_eq!(outcome.firing_position, Some(Position::new(0.0, 0.0, 1.5)));
        assert_eq!(outcome.bbox.unwrap().area(), 400);

        // Later frames do not move the firing position
        mission.lock().unwrap().current_state = Some(Position::new(9.0, 9.0, 9.0));
        mission.handle_frame(&frame).unwrap();
        assert_eq!(
            mission.outcome().unwrap().firing_position,
            Some(Position::new(0.0, 0.0, 1.5))
        );
    }

    #[test]
    fn test_record_outcome_with_target() {
        let dir = tempfile::tempdir().unwrap();
        let target_file = dir.path().join("shoot_here.csv");
        let storage = Storage::open_in_memory().unwrap();
        let mission_id = storage.begin_mission("sim", ClimbMode::Direct).unwrap();

        let outcome = MissionOutcome {
            target_acquired: true,
            firing_position: Some(Position::new(0.0, 0.1, 1.5)),
            bbox: None,
            detected_at: None,
            emergency: false,
        };
        let id = record_outcome(&storage, mission_id, &outcome, outcome.label(), &target_file)
            .unwrap()
            .unwrap();

        assert_eq!(
            export::read_firing_position(&target_file).unwrap(),
            Position::new(0.0, 0.1, 1.5)
        );
        let stored = storage.get_detection(id).unwrap().unwrap();
        assert_eq!(stored.mission_id, mission_id);
        let mission = storage.get_mission(mission_id).unwrap().unwrap();
        assert_eq!(mission.outcome.as_deref(), Some("target_acquired"));
    }

    #[test]
    fn test_record_outcome_without_target() {
        let dir = tempfile::tempdir().unwrap();
        let target_file = dir.path().join("shoot_here.csv");
        let storage = Storage::open_in_memory().unwrap();
        let mission_id = storage.begin_mission("sim", ClimbMode::Direct).unwrap();

        let outcome = MissionOutcome {
            target_acquired: false,
            firing_position: None,
            bbox: None,
            detected_at: None,
            emergency: false,
        };
        assert!(record_outcome(&storage, mission_id, &outcome, outcome.label(), &target_file)
            .unwrap()
            .is_none());
        assert!(!target_file.exists());
        assert_eq!(storage.count_detections().unwrap(), 0);
    }
}
