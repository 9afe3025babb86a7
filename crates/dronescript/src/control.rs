//! Position control.
//!
//! Three decoupled PID loops turn a position error into a direct piloting
//! command: `x` error drives pitch, `y` error drives roll and `z` error drives
//! vertical speed. Yaw is held at zero.

use tracing::trace;

use crate::config::ControlConfig;
use crate::state::{PilotCommand, Position};

/// Integral windup limit in metre-seconds.
const INTEGRAL_LIMIT: f64 = 2.0;

/// Generic PID controller.
#[derive(Debug, Clone)]
pub struct Pid {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    integral: f64,
    last_error: Option<f64>,
}

impl Pid {
    /// Create a controller with the given gains.
    #[must_use]
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            last_error: None,
        }
    }

    /// One PID step over `dt` seconds. Returns the control output.
    ///
    /// The first step after a reset has no derivative term.
    pub fn step(&mut self, error: f64, dt: f64) -> f64 {
        if !(dt > 0.0) {
            return self.kp * error;
        }
        self.integral = (self.integral + error * dt).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        let derivative = self.last_error.map_or(0.0, |last| (error - last) / dt);
        self.last_error = Some(error);
        self.kp * error + self.ki * self.integral + self.kd * derivative
    }

    /// Reset accumulated state.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
    }

    /// Accumulated integral.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// Tracks a desired position from estimated positions.
#[derive(Debug, Clone)]
pub struct PositionController {
    pid_x: Pid,
    pid_y: Pid,
    pid_z: Pid,
    max_tilt: f64,
    max_vertical: f64,
    dt: f64,
    current: Option<Position>,
    desired: Option<Position>,
}

impl PositionController {
    /// Create a controller running every `dt` seconds.
    #[must_use]
    pub fn new(config: &ControlConfig, dt: f64) -> Self {
        Self {
            pid_x: Pid::new(config.xy_kp, config.xy_ki, config.xy_kd),
            pid_y: Pid::new(config.xy_kp, config.xy_ki, config.xy_kd),
            pid_z: Pid::new(config.z_kp, config.z_ki, config.z_kd),
            max_tilt: f64::from(config.max_tilt),
            max_vertical: f64::from(config.max_vertical),
            dt,
            current: None,
            desired: None,
        }
    }

    /// Record the latest estimated position.
    pub fn set_current_state(&mut self, position: Position) {
        self.current = Some(position);
    }

    /// Change the setpoint. Integrators restart when the setpoint moves.
    pub fn set_desired_state(&mut self, position: Position) {
        if self.desired != Some(position) {
            self.pid_x.reset();
            self.pid_y.reset();
            self.pid_z.reset();
        }
        self.desired = Some(position);
    }

    /// Latest estimated position.
    #[must_use]
    pub fn current_state(&self) -> Option<Position> {
        self.current
    }

    /// Current setpoint.
    #[must_use]
    pub fn desired_state(&self) -> Option<Position> {
        self.desired
    }

    /// Distance between the estimate and the setpoint, if both are known.
    #[must_use]
    pub fn distance_to_goal(&self) -> Option<f64> {
        Some(self.current?.distance_to(&self.desired?))
    }

    /// Compute the next piloting command.
    ///
    /// Returns a neutral command until both the estimate and the setpoint
    /// are known.
    pub fn calculate_cmd_input(&mut self) -> PilotCommand {
        let (Some(current), Some(desired)) = (self.current, self.desired) else {
            return PilotCommand::neutral();
        };

        let pitch = self.pid_x.step(desired.x - current.x, self.dt);
        let roll = self.pid_y.step(desired.y - current.y, self.dt);
        let vertical = self.pid_z.step(desired.z - current.z, self.dt);

        let cmd = PilotCommand::new(
            roll.clamp(-self.max_tilt, self.max_tilt),
            pitch.clamp(-self.max_tilt, self.max_tilt),
            0.0,
            vertical.clamp(-self.max_vertical, self.max_vertical),
        );
        trace!(?cmd, current = %current, desired = %desired, "Position command");
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PositionController {
        PositionController::new(&ControlConfig::default(), 0.05)
    }

    #[test]
    fn test_pid_proportional_only() {
        let mut pid = Pid::new(2.0, 0.0, 0.0);
        assert!((pid.step(1.5, 0.1) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pid_first_step_has_no_derivative_kick() {
        let mut pid = Pid::new(0.0, 0.0, 10.0);
        assert!(pid.step(1.0, 0.1).abs() < 1e-12);
        // Error unchanged → still no derivative
        assert!(pid.step(1.0, 0.1).abs() < 1e-12);
        // Error drops by 0.5 over 0.1 s
        assert!((pid.step(0.5, 0.1) + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_pid_integral_is_clamped() {
        let mut pid = Pid::new(0.0, 1.0, 0.0);
        for _ in 0..1_000 {
            pid.step(10.0, 0.1);
        }
        assert!((pid.integral() - INTEGRAL_LIMIT).abs() < 1e-12);
    }

    #[test]
    fn test_pid_reset() {
        let mut pid = Pid::new(1.0, 1.0, 1.0);
        pid.step(1.0, 0.1);
        pid.reset();
        assert!(pid.integral().abs() < 1e-12);
    }

    #[test]
    fn test_neutral_without_state() {
        let mut ctrl = controller();
        assert!(ctrl.calculate_cmd_input().is_neutral());

        ctrl.set_desired_state(Position::new(0.0, 0.0, 1.0));
        assert!(ctrl.calculate_cmd_input().is_neutral());
        assert!(ctrl.distance_to_goal().is_none());
    }

    #[test]
    fn test_axis_mapping() {
        let mut ctrl = controller();
        ctrl.set_current_state(Position::default());
        ctrl.set_desired_state(Position::new(0.5, -0.5, 0.2));

        let cmd = ctrl.calculate_cmd_input();
        assert!(cmd.pitch > 0, "forward error pitches forward: {cmd:?}");
        assert!(cmd.roll < 0, "leftward error rolls left: {cmd:?}");
        assert!(cmd.vertical > 0, "up error climbs: {cmd:?}");
        assert_eq!(cmd.yaw, 0);
    }

    #[test]
    fn test_output_limits() {
        let mut ctrl = controller();
        ctrl.set_current_state(Position::default());
        ctrl.set_desired_state(Position::new(100.0, 100.0, -100.0));

        let cmd = ctrl.calculate_cmd_input();
        let config = ControlConfig::default();
        assert_eq!(cmd.pitch, config.max_tilt);
        assert_eq!(cmd.roll, config.max_tilt);
        assert_eq!(cmd.vertical, -config.max_vertical);
    }

    #[test]
    fn test_at_goal_is_neutral() {
        let mut ctrl = controller();
        let p = Position::new(1.0, 1.0, 1.0);
        ctrl.set_current_state(p);
        ctrl.set_desired_state(p);

        assert!(ctrl.calculate_cmd_input().is_neutral());
        assert!(ctrl.distance_to_goal().unwrap().abs() < 1e-12);
    }
}
