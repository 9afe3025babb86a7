//! `dronescript` - Scriptable drone flights with sensor and vision hooks
//!
//! A flight script supplies a required control routine and, optionally, a
//! callback for sensor readings and a callback for camera frames. The
//! [`Runner`] connects to a [`DroneLink`], feeds the callbacks from polling
//! monitors while the routine flies, and always lands and disconnects.
//!
//! The crate ships a simulated drone, a Kalman position estimator, a PID
//! position controller, a colour target detector, and the target detection
//! mission built from them.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod estimation;
pub mod logging;
pub mod mission;
pub mod monitor;
pub mod script;
pub mod state;
pub mod storage;
pub mod vision;

pub use backend::{DroneLink, SimulatedDrone};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use mission::{DetectionMission, MissionOutcome};
pub use script::{FlightContext, FlightRoutine, Runner, ScriptHooks};
pub use storage::{Storage, StorageStats};
