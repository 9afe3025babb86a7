//! Drone link abstraction.
//!
//! This module defines the trait every drone backend implements. Flight
//! routines, the sensor monitor and the vision monitor all talk to the drone
//! through a shared `Arc<dyn DroneLink>`.

pub mod sim;

use std::time::Duration;

use crate::error::Result;
use crate::state::{FlyingState, Frame, PilotCommand, SensorReading};

pub use sim::{SimConfig, SimulatedDrone};

/// A connection to one drone.
///
/// All methods take `&self`; implementations use interior mutability so the
/// link can be shared between the flight routine and the monitors.
#[async_trait::async_trait]
pub trait DroneLink: Send + Sync {
    /// The name of this link (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the drone cannot be reached or is already connected.
    async fn connect(&self) -> Result<()>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails to shut down cleanly.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is currently connected.
    fn is_connected(&self) -> bool;

    /// Take off and wait until the drone hovers, an emergency is reported,
    /// or `timeout` elapses.
    ///
    /// An emergency is not an error here; check [`DroneLink::flying_state`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] if the drone is still climbing after `timeout`.
    async fn takeoff(&self, timeout: Duration) -> Result<()>;

    /// Land and wait until the drone reports it is down.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] if the drone has not landed after `timeout`.
    async fn land(&self, timeout: Duration) -> Result<()>;

    /// Send one direct piloting command and wait for it to complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is down or the drone is in emergency.
    async fn fly_direct(&self, cmd: PilotCommand) -> Result<()>;

    /// Hold position for one command period.
    ///
    /// # Errors
    ///
    /// See [`DroneLink::fly_direct`].
    async fn hover(&self) -> Result<()> {
        self.fly_direct(PilotCommand::neutral()).await
    }

    /// Sleep while keeping the link serviced.
    ///
    /// # Errors
    ///
    /// Returns an error if the link drops while sleeping.
    async fn smart_sleep(&self, duration: Duration) -> Result<()>;

    /// The latest sensor reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is not connected.
    fn sensors(&self) -> Result<SensorReading>;

    /// The current flying state.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is not connected.
    fn flying_state(&self) -> Result<FlyingState> {
        Ok(self.sensors()?.flying_state)
    }

    /// Start streaming video.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot be started.
    async fn start_video(&self) -> Result<()>;

    /// Stop streaming video.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot be stopped.
    async fn close_video(&self) -> Result<()>;

    /// The most recent valid frame, if video is streaming.
    fn latest_frame(&self) -> Option<Frame>;
}
