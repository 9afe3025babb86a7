//! Configuration management for dronescript.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::backend::sim::SimConfig;
use crate::error::{Error, Result};
use crate::vision::HsvRange;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "dronescript";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "missions.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `DRONESCRIPT_`, sections split on `__`)
/// 2. TOML config file at `~/.config/dronescript/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Drone connection configuration.
    pub connection: ConnectionConfig,
    /// Flight routine configuration.
    pub flight: FlightConfig,
    /// Sensor monitor configuration.
    pub sensors: SensorConfig,
    /// Vision monitor configuration.
    pub vision: VisionConfig,
    /// Position controller configuration.
    pub control: ControlConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Simulator configuration.
    pub sim: SimConfig,
}

/// How to reach the drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Hardware address of the drone.
    pub address: String,
    /// Connect over WiFi instead of BLE.
    pub use_wifi: bool,
}

/// How the detection flight climbs towards the target.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ClimbMode {
    /// Fixed vertical power with no closed-loop control.
    #[default]
    Direct,
    /// Step the setpoint upwards and track it with the position controller.
    Controlled,
}

impl std::fmt::Display for ClimbMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Controlled => write!(f, "controlled"),
        }
    }
}

impl std::str::FromStr for ClimbMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "controlled" => Ok(Self::Controlled),
            other => Err(invalid(format!("unknown climb mode: {other}"))),
        }
    }
}

/// Flight routine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Seconds to wait for takeoff to finish.
    pub takeoff_timeout_secs: u64,
    /// Seconds to wait for landing to finish.
    pub land_timeout_secs: u64,
    /// Distance in metres at which a setpoint counts as reached.
    pub eps: f64,
    /// Altitude ceiling in metres.
    pub max_altitude: f64,
    /// Largest accepted distance from the setpoint in metres.
    pub max_distance: f64,
    /// Climb strategy.
    pub climb_mode: ClimbMode,
    /// Setpoint increment per controlled climb step, in metres.
    pub climb_step: f64,
    /// Vertical power for a direct climb, in percent.
    pub climb_power: u8,
    /// Hover time after the climb, in milliseconds.
    pub hover_after_climb_ms: u64,
    /// Roll used to leave the target area.
    pub fly_away_roll: i8,
    /// Pitch used to leave the target area.
    pub fly_away_pitch: i8,
    /// Duration of the fly-away manoeuvre, in milliseconds.
    pub fly_away_ms: u64,
    /// How long to wait for sensor calibration and the first estimate, in milliseconds.
    pub sensor_wait_ms: u64,
    /// CSV file receiving the firing position.
    pub target_file: PathBuf,
}

/// Sensor monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Interval between sensor polls in milliseconds.
    pub poll_ms: u64,
}

/// Vision monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Stream video and run the vision callback.
    pub enabled: bool,
    /// Interval between frame polls in milliseconds.
    pub poll_ms: u64,
    /// Smallest bounding box area (px²) that counts as the target.
    pub area_threshold: u32,
    /// Colour range of the target.
    pub hsv: HsvRange,
}

/// Position controller gains and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Proportional gain on horizontal error (percent per metre).
    pub xy_kp: f64,
    /// Integral gain on horizontal error.
    pub xy_ki: f64,
    /// Derivative gain on horizontal error.
    pub xy_kd: f64,
    /// Proportional gain on vertical error (percent per metre).
    pub z_kp: f64,
    /// Integral gain on vertical error.
    pub z_ki: f64,
    /// Derivative gain on vertical error.
    pub z_kd: f64,
    /// Largest roll or pitch command, in percent.
    pub max_tilt: i8,
    /// Largest vertical command, in percent.
    pub max_vertical: i8,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/dronescript/missions.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of missions to retain.
    /// Set to 0 for unlimited.
    pub max_missions: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: "e0:14:ad:f6:3d:fc".to_string(),
            use_wifi: true,
        }
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            takeoff_timeout_secs: 5,
            land_timeout_secs: 5,
            eps: 0.08,
            max_altitude: 3.0,
            max_distance: 3.0,
            climb_mode: ClimbMode::Direct,
            climb_step: 0.1,
            climb_power: 30,
            hover_after_climb_ms: 2_000,
            fly_away_roll: 30,
            fly_away_pitch: -30,
            fly_away_ms: 3_000,
            sensor_wait_ms: 10_000,
            target_file: PathBuf::from("shoot_here.csv"),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { poll_ms: 50 }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_ms: 100,
            area_threshold: 62_648,
            hsv: HsvRange::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            xy_kp: 40.0,
            xy_ki: 2.0,
            xy_kd: 15.0,
            z_kp: 60.0,
            z_ki: 5.0,
            z_kd: 10.0,
            max_tilt: 40,
            max_vertical: 50,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved to the data dir at runtime
            max_missions: 1_000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("DRONESCRIPT_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let flight = &self.flight;
        if !(flight.eps > 0.0) {
            return Err(invalid(format!("flight.eps must be positive, got {}", flight.eps)));
        }
        if !(flight.max_altitude > 0.0) {
            return Err(invalid(format!(
                "flight.max_altitude must be positive, got {}",
                flight.max_altitude
            )));
        }
        if !(flight.max_distance > flight.eps) {
            return Err(invalid(format!(
                "flight.max_distance ({}) must be greater than flight.eps ({})",
                flight.max_distance, flight.eps
            )));
        }
        if !(flight.climb_step > 0.0) {
            return Err(invalid("flight.climb_step must be positive".to_string()));
        }
        if flight.climb_power == 0 || flight.climb_power > 100 {
            return Err(invalid(format!(
                "flight.climb_power must be within 1..=100, got {}",
                flight.climb_power
            )));
        }
        if flight.takeoff_timeout_secs == 0 || flight.land_timeout_secs == 0 {
            return Err(invalid(
                "flight takeoff/land timeouts must be greater than 0".to_string(),
            ));
        }
        if flight.sensor_wait_ms == 0 {
            return Err(invalid("flight.sensor_wait_ms must be greater than 0".to_string()));
        }

        if self.sensors.poll_ms == 0 {
            return Err(invalid("sensors.poll_ms must be greater than 0".to_string()));
        }
        if self.vision.poll_ms == 0 {
            return Err(invalid("vision.poll_ms must be greater than 0".to_string()));
        }
        if self.vision.area_threshold == 0 {
            return Err(invalid("vision.area_threshold must be greater than 0".to_string()));
        }
        self.vision
            .hsv
            .validate()
            .map_err(|message| invalid(format!("vision.hsv: {message}")))?;

        if self.control.max_tilt <= 0 || self.control.max_vertical <= 0 {
            return Err(invalid(
                "control.max_tilt and control.max_vertical must be positive".to_string(),
            ));
        }

        self.sim
            .validate()
            .map_err(|message| invalid(format!("sim: {message}")))?;

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the sensor poll interval as a Duration.
    #[must_use]
    pub fn sensor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensors.poll_ms)
    }

    /// Get the vision poll interval as a Duration.
    #[must_use]
    pub fn vision_poll_interval(&self) -> Duration {
        Duration::from_millis(self.vision.poll_ms)
    }
}

impl FlightConfig {
    /// Takeoff timeout as a Duration.
    #[must_use]
    pub fn takeoff_timeout(&self) -> Duration {
        Duration::from_secs(self.takeoff_timeout_secs)
    }

    /// Landing timeout as a Duration.
    #[must_use]
    pub fn land_timeout(&self) -> Duration {
        Duration::from_secs(self.land_timeout_secs)
    }

    /// Hover time after the climb as a Duration.
    #[must_use]
    pub fn hover_after_climb(&self) -> Duration {
        Duration::from_millis(self.hover_after_climb_ms)
    }

    /// Fly-away duration as a Duration.
    #[must_use]
    pub fn fly_away_duration(&self) -> Duration {
        Duration::from_millis(self.fly_away_ms)
    }

    /// Sensor wait timeout as a Duration.
    #[must_use]
    pub fn sensor_wait(&self) -> Duration {
        Duration::from_millis(self.sensor_wait_ms)
    }
}

fn invalid(message: String) -> Error {
    Error::ConfigValidation { message }
}
