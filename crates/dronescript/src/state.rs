//! Core flight data types.
//!
//! Positions are in metres relative to the takeoff point, with `z` pointing up.
//! The drone itself reports centimetres with `z` pointing down; see
//! [`SensorReading::position`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A point in the takeoff frame, in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Forward.
    pub x: f64,
    /// Right.
    pub y: f64,
    /// Up.
    pub z: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Return this position shifted by the given deltas.
    #[must_use]
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Components as an array.
    #[must_use]
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Check that every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// A velocity in the takeoff frame, in m/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// Forward speed.
    pub x: f64,
    /// Rightward speed.
    pub y: f64,
    /// Vertical speed (up is positive).
    pub z: f64,
}

impl Velocity {
    /// Create a new velocity.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Components as an array.
    #[must_use]
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// The flying state reported by the drone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlyingState {
    /// On the ground, motors off.
    #[default]
    Landed,
    /// Climbing to the takeoff altitude.
    TakingOff,
    /// Airborne with no motion command.
    Hovering,
    /// Airborne and following commands.
    Flying,
    /// Descending to land.
    Landing,
    /// Motors cut after a fault.
    Emergency,
}

impl FlyingState {
    /// Whether the drone is off the ground.
    #[must_use]
    pub fn is_airborne(&self) -> bool {
        matches!(
            self,
            Self::TakingOff | Self::Hovering | Self::Flying | Self::Landing
        )
    }
}

impl fmt::Display for FlyingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Landed => write!(f, "landed"),
            Self::TakingOff => write!(f, "takingoff"),
            Self::Hovering => write!(f, "hovering"),
            Self::Flying => write!(f, "flying"),
            Self::Landing => write!(f, "landing"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// One sensor sample as delivered by the drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Raw position in centimetres, `z` pointing down.
    pub position_cm: [f64; 3],
    /// Velocity in m/s, takeoff frame, `z` up.
    pub speed: Velocity,
    /// Timestamp of the last velocity sample; zero until the sensors are calibrated.
    pub speed_ts: u64,
    /// Current flying state.
    pub flying_state: FlyingState,
    /// Remaining battery in percent.
    pub battery_percent: u8,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Position in metres with `z` up.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(
            self.position_cm[0] / 100.0,
            self.position_cm[1] / 100.0,
            self.position_cm[2] / -100.0,
        )
    }

    /// Whether the velocity sensors have produced their first sample.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.speed_ts != 0
    }
}

impl Default for SensorReading {
    fn default() -> Self {
        Self {
            position_cm: [0.0; 3],
            speed: Velocity::default(),
            speed_ts: 0,
            flying_state: FlyingState::Landed,
            battery_percent: 100,
            timestamp: Utc::now(),
        }
    }
}

/// Limit for every attitude and thrust channel.
pub const COMMAND_LIMIT: i8 = 100;

/// A direct piloting command.
///
/// Each channel is a percentage of the drone's maximum in `[-100, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PilotCommand {
    /// Positive rolls right and moves the drone along `+y`.
    pub roll: i8,
    /// Positive pitches forward and moves the drone along `+x`.
    pub pitch: i8,
    /// Yaw rate.
    pub yaw: i8,
    /// Vertical speed, positive climbs.
    pub vertical: i8,
    /// How long to hold the command; `None` holds it for one command period.
    pub duration: Option<Duration>,
}

impl PilotCommand {
    /// Build a command, clamping each channel to `[-100, 100]`.
    #[must_use]
    pub fn new(roll: f64, pitch: f64, yaw: f64, vertical: f64) -> Self {
        Self {
            roll: clamp_channel(roll),
            pitch: clamp_channel(pitch),
            yaw: clamp_channel(yaw),
            vertical: clamp_channel(vertical),
            duration: None,
        }
    }

    /// The zero command.
    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Hold this command for a fixed duration.
    #[must_use]
    pub fn for_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Whether every channel is zero.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.roll == 0 && self.pitch == 0 && self.yaw == 0 && self.vertical == 0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_channel(value: f64) -> i8 {
    if value.is_nan() {
        return 0;
    }
    let limit = f64::from(COMMAND_LIMIT);
    value.round().clamp(-limit, limit) as i8
}

/// A camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter.
    pub seq: u64,
    /// When the frame was captured.
    pub captured_at: DateTime<Utc>,
    /// RGB pixels.
    pub image: Arc<RgbImage>,
}

impl Frame {
    /// Wrap an image as a frame.
    #[must_use]
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Utc::now(),
            image: Arc::new(image),
        }
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
