//! Simulated quadrotor.
//!
//! A kinematic model with a first-order velocity response, a synthetic camera
//! looking along `+x`, and a coloured square target. Time comes from
//! `tokio::time`, so paused-clock tests run deterministically.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::DroneLink;
use crate::error::{Error, Result};
use crate::state::{FlyingState, Frame, PilotCommand, SensorReading, Velocity};

const LINK_NAME: &str = "sim";

/// Largest physics integration step.
const MAX_SUBSTEP: f64 = 0.01;

const SKY: Rgb<u8> = Rgb([110, 140, 170]);
const TARGET: Rgb<u8> = Rgb([255, 128, 0]);

/// Simulator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Altitude reached by takeoff, in metres.
    pub takeoff_altitude: f64,
    /// Climb speed during takeoff, m/s.
    pub takeoff_speed: f64,
    /// Descent speed during landing, m/s.
    pub land_speed: f64,
    /// Horizontal speed at 100% tilt, m/s.
    pub max_horizontal_speed: f64,
    /// Vertical speed at 100% thrust, m/s.
    pub max_vertical_speed: f64,
    /// Yaw rate at 100% yaw, degrees per second.
    pub max_yaw_rate: f64,
    /// Time constant of the velocity response, seconds.
    pub response_time: f64,
    /// How long a command without a duration is held, milliseconds.
    pub command_period_ms: u64,
    /// Delay between connecting and the first velocity sample, milliseconds.
    pub calibration_ms: u64,
    /// Frame width in pixels.
    pub camera_width: u32,
    /// Frame height in pixels.
    pub camera_height: u32,
    /// Focal length in pixels.
    pub focal_px: f64,
    /// Interval between camera frames, milliseconds.
    pub frame_interval_ms: u64,
    /// Target centre in the takeoff frame, metres.
    pub target: [f64; 3],
    /// Edge length of the square target, metres.
    pub target_size: f64,
    /// Cut the motors as soon as takeoff is requested.
    pub fail_takeoff: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            takeoff_altitude: 1.0,
            takeoff_speed: 0.6,
            land_speed: 0.6,
            max_horizontal_speed: 2.0,
            max_vertical_speed: 1.0,
            max_yaw_rate: 90.0,
            response_time: 0.2,
            command_period_ms: 50,
            calibration_ms: 500,
            camera_width: 640,
            camera_height: 360,
            focal_px: 320.0,
            frame_interval_ms: 66,
            target: [1.0, 0.0, 1.6],
            target_size: 0.8,
            fail_takeoff: false,
        }
    }
}

impl SimConfig {
    /// Check that the parameters describe a usable simulator.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid parameter.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let positive = [
            ("takeoff_altitude", self.takeoff_altitude),
            ("takeoff_speed", self.takeoff_speed),
            ("land_speed", self.land_speed),
            ("max_horizontal_speed", self.max_horizontal_speed),
            ("max_vertical_speed", self.max_vertical_speed),
            ("response_time", self.response_time),
            ("focal_px", self.focal_px),
            ("target_size", self.target_size),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err("camera dimensions must be non-zero".to_string());
        }
        if self.command_period_ms == 0 || self.frame_interval_ms == 0 {
            return Err("command_period_ms and frame_interval_ms must be non-zero".to_string());
        }
        Ok(())
    }

    fn command_period(&self) -> Duration {
        Duration::from_millis(self.command_period_ms)
    }
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    connected_at: Option<Instant>,
    last_update: Instant,
    flying_state: FlyingState,
    position: [f64; 3],
    velocity: [f64; 3],
    yaw_deg: f64,
    command: PilotCommand,
    command_until: Instant,
    battery: f64,
    video: bool,
    frame_seq: u64,
    last_frame: Option<(Instant, Frame)>,
}

impl SimState {
    fn new(now: Instant) -> Self {
        Self {
            connected: false,
            connected_at: None,
            last_update: now,
            flying_state: FlyingState::Landed,
            position: [0.0; 3],
            velocity: [0.0; 3],
            yaw_deg: 0.0,
            command: PilotCommand::neutral(),
            command_until: now,
            battery: 100.0,
            video: false,
            frame_seq: 0,
            last_frame: None,
        }
    }
}

/// A simulated drone implementing [`DroneLink`].
#[derive(Debug)]
pub struct SimulatedDrone {
    config: SimConfig,
    address: String,
    use_wifi: bool,
    epoch: (Instant, DateTime<Utc>),
    state: Mutex<SimState>,
}

impl SimulatedDrone {
    /// Create a simulator with the given parameters.
    #[must_use]
    pub fn new(config: SimConfig, address: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            config,
            address: address.into(),
            use_wifi: false,
            epoch: (now, Utc::now()),
            state: Mutex::new(SimState::new(now)),
        }
    }

    /// Create a simulator with default parameters.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SimConfig::default(), "sim")
    }

    /// Select the transport the simulator reports: WiFi or Bluetooth LE.
    #[must_use]
    pub fn with_wifi(mut self, use_wifi: bool) -> Self {
        self.use_wifi = use_wifi;
        self
    }

    /// The configured address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Transport name, `wifi` or `ble`.
    #[must_use]
    pub fn transport(&self) -> &'static str {
        if self.use_wifi {
            "wifi"
        } else {
            "ble"
        }
    }

    /// Wall-clock time of a simulator instant.
    fn wall_clock(&self, at: Instant) -> DateTime<Utc> {
        let (start, wall) = self.epoch;
        let elapsed = chrono::Duration::from_std(at.saturating_duration_since(start))
            .unwrap_or_else(|_| chrono::Duration::zero());
        wall + elapsed
    }

    /// Cut the motors immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulator state is poisoned.
    pub fn force_emergency(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.advance(&mut state, Instant::now());
        warn!("Simulated emergency triggered");
        state.flying_state = FlyingState::Emergency;
        state.velocity = [0.0; 3];
        state.position[2] = 0.0;
        Ok(())
    }

    /// True position in metres, bypassing the sensor model.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulator state is poisoned.
    pub fn true_position(&self) -> Result<[f64; 3]> {
        let mut state = self.lock()?;
        self.advance(&mut state, Instant::now());
        Ok(state.position)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("simulator state poisoned"))
    }

    fn lock_connected(&self) -> Result<MutexGuard<'_, SimState>> {
        let state = self.lock()?;
        if state.connected {
            Ok(state)
        } else {
            Err(Error::NotConnected { name: LINK_NAME })
        }
    }

    /// Integrate the model up to `now`.
    fn advance(&self, state: &mut SimState, now: Instant) {
        let mut t = state.last_update;
        state.last_update = now;

        while t < now {
            let dt = now
                .saturating_duration_since(t)
                .min(Duration::from_secs_f64(MAX_SUBSTEP));
            self.substep(state, dt.as_secs_f64(), t);
            t += dt;
        }
    }

    /// Integrate one step of `dt` seconds starting at `t`.
    fn substep(&self, state: &mut SimState, dt: f64, t: Instant) {
        let cfg = &self.config;
        let mut target_vel = [0.0; 3];
        let mut yaw_rate = 0.0;

        match state.flying_state {
            FlyingState::Landed | FlyingState::Emergency => {
                state.velocity = [0.0; 3];
                return;
            }
            FlyingState::TakingOff => {
                target_vel[2] = cfg.takeoff_speed;
            }
            FlyingState::Landing => {
                target_vel[2] = -cfg.land_speed;
            }
            FlyingState::Hovering | FlyingState::Flying => {
                let cmd = if t < state.command_until {
                    state.command
                } else {
                    PilotCommand::neutral()
                };
                let (sin, cos) = state.yaw_deg.to_radians().sin_cos();
                let forward = f64::from(cmd.pitch) / 100.0 * cfg.max_horizontal_speed;
                let right = f64::from(cmd.roll) / 100.0 * cfg.max_horizontal_speed;
                target_vel[0] = forward * cos - right * sin;
                target_vel[1] = forward * sin + right * cos;
                target_vel[2] = f64::from(cmd.vertical) / 100.0 * cfg.max_vertical_speed;
                yaw_rate = f64::from(cmd.yaw) / 100.0 * cfg.max_yaw_rate;

                state.flying_state = if cmd.is_neutral() {
                    FlyingState::Hovering
                } else {
                    FlyingState::Flying
                };
            }
        }

        let alpha = (dt / cfg.response_time).min(1.0);
        for axis in 0..3 {
            state.velocity[axis] += (target_vel[axis] - state.velocity[axis]) * alpha;
            state.position[axis] += state.velocity[axis] * dt;
        }
        state.yaw_deg = (state.yaw_deg + yaw_rate * dt).rem_euclid(360.0);
        state.battery = (state.battery - dt * 0.05).max(0.0);

        match state.flying_state {
            FlyingState::TakingOff if state.position[2] >= cfg.takeoff_altitude => {
                debug!(altitude = state.position[2], "Takeoff complete");
                state.flying_state = FlyingState::Hovering;
            }
            FlyingState::Landing if state.position[2] <= 0.0 => {
                debug!("Touchdown");
                state.flying_state = FlyingState::Landed;
                state.position[2] = 0.0;
                state.velocity = [0.0; 3];
            }
            _ if state.position[2] < 0.0 => {
                state.position[2] = 0.0;
                state.velocity[2] = state.velocity[2].max(0.0);
            }
            _ => {}
        }
    }

    fn reading(&self, state: &SimState, now: Instant) -> SensorReading {
        let speed_ts = state
            .connected_at
            .map(|at| now.saturating_duration_since(at))
            .filter(|elapsed| *elapsed >= Duration::from_millis(self.config.calibration_ms))
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1)
            });

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let battery_percent = state.battery.round().clamp(0.0, 100.0) as u8;

        SensorReading {
            position_cm: [
                state.position[0] * 100.0,
                state.position[1] * 100.0,
                -state.position[2] * 100.0,
            ],
            speed: Velocity::new(state.velocity[0], state.velocity[1], state.velocity[2]),
            speed_ts,
            flying_state: state.flying_state,
            battery_percent,
            timestamp: self.wall_clock(now),
        }
    }

    /// Render what the camera sees from the current pose.
    fn render(&self, state: &SimState) -> RgbImage {
        let cfg = &self.config;
        let mut image = RgbImage::from_pixel(cfg.camera_width, cfg.camera_height, SKY);

        // Target in the body frame (camera looks along +x)
        let dx = cfg.target[0] - state.position[0];
        let dy = cfg.target[1] - state.position[1];
        let dz = cfg.target[2] - state.position[2];
        let (sin, cos) = state.yaw_deg.to_radians().sin_cos();
        let range = dx * cos + dy * sin;
        let lateral = -dx * sin + dy * cos;
        if range <= 0.05 {
            return image;
        }

        let side = cfg.focal_px * cfg.target_size / range;
        let cu = f64::from(cfg.camera_width) / 2.0 + cfg.focal_px * lateral / range;
        let cv = f64::from(cfg.camera_height) / 2.0 - cfg.focal_px * dz / range;

        let u0 = clip(cu - side / 2.0, cfg.camera_width);
        let u1 = clip(cu + side / 2.0, cfg.camera_width);
        let v0 = clip(cv - side / 2.0, cfg.camera_height);
        let v1 = clip(cv + side / 2.0, cfg.camera_height);

        for v in v0..v1 {
            for u in u0..u1 {
                image.put_pixel(u, v, TARGET);
            }
        }
        image
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip(value: f64, limit: u32) -> u32 {
    value.round().clamp(0.0, f64::from(limit)) as u32
}

#[async_trait::async_trait]
impl DroneLink for SimulatedDrone {
    fn name(&self) -> &'static str {
        LINK_NAME
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.connected {
            return Err(Error::AlreadyConnected { name: LINK_NAME });
        }
        let now = Instant::now();
        self.advance(&mut state, now);
        state.connected = true;
        state.connected_at = Some(now);
        info!(
            address = %self.address,
            transport = self.transport(),
            "Connected to simulated drone"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.connected {
            return Err(Error::NotConnected { name: LINK_NAME });
        }
        state.connected = false;
        state.connected_at = None;
        state.video = false;
        info!(address = %self.address, "Disconnected from simulated drone");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().map(|s| s.connected).unwrap_or(false)
    }

    async fn takeoff(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.lock_connected()?;
            self.advance(&mut state, Instant::now());
            match state.flying_state {
                FlyingState::Landed if self.config.fail_takeoff => {
                    warn!("Motors cut during takeoff");
                    state.flying_state = FlyingState::Emergency;
                    return Ok(());
                }
                FlyingState::Landed => {
                    debug!("Taking off");
                    state.flying_state = FlyingState::TakingOff;
                }
                FlyingState::Emergency => return Ok(()),
                _ => {}
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.flying_state()? {
                FlyingState::Hovering | FlyingState::Flying | FlyingState::Emergency => {
                    return Ok(())
                }
                _ if Instant::now() >= deadline => return Err(Error::timeout("takeoff")),
                _ => tokio::time::sleep(self.config.command_period()).await,
            }
        }
    }

    async fn land(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.lock_connected()?;
            self.advance(&mut state, Instant::now());
            match state.flying_state {
                FlyingState::Landed | FlyingState::Emergency => return Ok(()),
                _ => {
                    debug!(altitude = state.position[2], "Landing");
                    state.flying_state = FlyingState::Landing;
                }
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.flying_state()? {
                FlyingState::Landed | FlyingState::Emergency => return Ok(()),
                _ if Instant::now() >= deadline => return Err(Error::timeout("landing")),
                _ => tokio::time::sleep(self.config.command_period()).await,
            }
        }
    }

    async fn fly_direct(&self, cmd: PilotCommand) -> Result<()> {
        let hold = cmd.duration.unwrap_or_else(|| self.config.command_period());
        {
            let mut state = self.lock_connected()?;
            let now = Instant::now();
            self.advance(&mut state, now);
            match state.flying_state {
                FlyingState::Emergency => {
                    return Err(Error::Emergency {
                        phase: "direct flight".to_string(),
                    })
                }
                FlyingState::Hovering | FlyingState::Flying => {
                    state.command = cmd;
                    state.command_until = now + hold;
                }
                other => {
                    debug!(state = %other, "Ignoring piloting command");
                }
            }
        }
        tokio::time::sleep(hold).await;
        Ok(())
    }

    async fn smart_sleep(&self, duration: Duration) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected { name: LINK_NAME });
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn sensors(&self) -> Result<SensorReading> {
        let mut state = self.lock_connected()?;
        let now = Instant::now();
        self.advance(&mut state, now);
        Ok(self.reading(&state, now))
    }

    async fn start_video(&self) -> Result<()> {
        let mut state = self.lock_connected()?;
        state.video = true;
        debug!(
            width = self.config.camera_width,
            height = self.config.camera_height,
            "Video stream started"
        );
        Ok(())
    }

    async fn close_video(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.video = false;
        state.last_frame = None;
        debug!("Video stream closed");
        Ok(())
    }

    fn latest_frame(&self) -> Option<Frame> {
        let mut state = self.state.lock().ok()?;
        if !state.connected || !state.video {
            return None;
        }
        let now = Instant::now();
        self.advance(&mut state, now);

        let interval = Duration::from_millis(self.config.frame_interval_ms);
        let stale = state
            .last_frame
            .as_ref()
            .map_or(true, |(at, _)| now.saturating_duration_since(*at) >= interval);
        if stale {
            state.frame_seq += 1;
            let frame = Frame::new(state.frame_seq, self.render(&state));
            state.last_frame = Some((now, frame));
        }
        state.last_frame.as_ref().map(|(_, frame)| frame.clone())
    }
}
