//! State estimation.
//!
//! A discrete linear Kalman filter and the position estimator built on top of
//! it for a small quadrotor.
//!
//! Model:
//!
//! ```text
//! x[k+1] = A x[k] + B u[k] + w,   w ~ N(0, Rw)
//! y[k]   = C x[k] + D u[k] + v,   v ~ N(0, Rv)
//! ```

pub mod linalg;

use ndarray::{Array1, Array2};
use tracing::trace;

use crate::error::{Error, Result};
use crate::state::{Position, Velocity};

/// Discrete linear Kalman filter.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    a: Array2<f64>,
    b: Array2<f64>,
    c: Array2<f64>,
    d: Array2<f64>,
    rw: Array2<f64>,
    rv: Array2<f64>,
    x: Array1<f64>,
    p: Array2<f64>,
}

impl KalmanFilter {
    /// Create a filter.
    ///
    /// The initial covariance is `x0 x0ᵀ + p0 I`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Estimation`] if the matrix dimensions disagree.
    #[allow(clippy::too_many_arguments, clippy::many_single_char_names)]
    pub fn new(
        a: Array2<f64>,
        b: Array2<f64>,
        c: Array2<f64>,
        d: Array2<f64>,
        rw: Array2<f64>,
        rv: Array2<f64>,
        x0: Array1<f64>,
        p0: f64,
    ) -> Result<Self> {
        let n = x0.len();
        let m = b.ncols();
        let k = c.nrows();

        check_shape("A", &a, n, n)?;
        check_shape("B", &b, n, m)?;
        check_shape("C", &c, k, n)?;
        check_shape("D", &d, k, m)?;
        check_shape("Rw", &rw, n, n)?;
        check_shape("Rv", &rv, k, k)?;

        let outer = x0
            .view()
            .insert_axis(ndarray::Axis(1))
            .dot(&x0.view().insert_axis(ndarray::Axis(0)));
        let p = outer + Array2::<f64>::eye(n) * p0;

        Ok(Self {
            a,
            b,
            c,
            d,
            rw,
            rv,
            x: x0,
            p,
        })
    }

    /// Number of states.
    #[must_use]
    pub fn state_dim(&self) -> usize {
        self.x.len()
    }

    /// Number of control inputs.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.b.ncols()
    }

    /// Number of measured outputs.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.c.nrows()
    }

    /// Current state estimate.
    #[must_use]
    pub fn state(&self) -> &Array1<f64> {
        &self.x
    }

    /// Current error covariance.
    #[must_use]
    pub fn covariance(&self) -> &Array2<f64> {
        &self.p
    }

    /// Propagate the estimate one step with control input `u`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Estimation`] if `u` has the wrong length.
    pub fn predict(&mut self, u: &Array1<f64>) -> Result<()> {
        check_len("u", u, self.input_dim())?;

        self.x = self.a.dot(&self.x) + self.b.dot(u);
        self.p = linalg::symmetrize(&(self.a.dot(&self.p).dot(&self.a.t()) + &self.rw));
        Ok(())
    }

    /// Correct the estimate with measurement `y` taken under input `u`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Estimation`] on a length mismatch or when the
    /// innovation covariance is singular.
    pub fn update(&mut self, y: &Array1<f64>, u: &Array1<f64>) -> Result<()> {
        check_len("y", y, self.output_dim())?;
        check_len("u", u, self.input_dim())?;

        let y_hat = self.c.dot(&self.x) + self.d.dot(u);
        let innovation = y - &y_hat;

        let pct = self.p.dot(&self.c.t());
        let s = self.c.dot(&pct) + &self.rv;
        let s_inv = linalg::invert(&s)
            .ok_or_else(|| Error::estimation("innovation covariance is singular"))?;
        let gain = pct.dot(&s_inv);

        self.x = &self.x + &gain.dot(&innovation);
        let n = self.state_dim();
        let i_kc = Array2::<f64>::eye(n) - gain.dot(&self.c);
        self.p = linalg::symmetrize(&i_kc.dot(&self.p));

        if self.x.iter().any(|v| !v.is_finite()) {
            return Err(Error::estimation("state estimate diverged"));
        }
        Ok(())
    }

    /// One full filter cycle: predict with `u`, then correct with `y`.
    ///
    /// # Errors
    ///
    /// See [`KalmanFilter::predict`] and [`KalmanFilter::update`].
    pub fn step(&mut self, y: &Array1<f64>, u: &Array1<f64>) -> Result<&Array1<f64>> {
        self.predict(u)?;
        self.update(y, u)?;
        Ok(&self.x)
    }
}

fn check_shape(name: &str, m: &Array2<f64>, rows: usize, cols: usize) -> Result<()> {
    if m.dim() == (rows, cols) {
        Ok(())
    } else {
        Err(Error::estimation(format!(
            "{name} is {}x{}, expected {rows}x{cols}",
            m.nrows(),
            m.ncols()
        )))
    }
}

fn check_len(name: &str, v: &Array1<f64>, len: usize) -> Result<()> {
    if v.len() == len {
        Ok(())
    } else {
        Err(Error::estimation(format!(
            "{name} has length {}, expected {len}",
            v.len()
        )))
    }
}

/// Number of states in the quadrotor model: `x y z yaw pitch roll ẋ ẏ ż p q r`.
pub const QUAD_STATES: usize = 12;
/// Number of control inputs in the quadrotor model.
pub const QUAD_INPUTS: usize = 4;
/// Number of measured outputs: position and velocity.
pub const QUAD_OUTPUTS: usize = 6;

/// Linearised continuous-time dynamics about hover.
#[rustfmt::skip]
const QUAD_A: [[f64; QUAD_STATES]; QUAD_STATES] = [
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  1.0,    0.0,     0.0, 0.0,     0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    1.0,     0.0, 0.0,     0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     1.0, 0.0,     0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     0.0, 0.0,     0.0,     1.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     0.0, 0.0,     1.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     0.0, 1.0,     0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, -9.81, 0.0,  -0.064, 0.0,     0.0, 0.0,     0.1382,  0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   9.81, 0.0,    -0.64,   0.0, -0.1382, 0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     0.0, 0.0,     0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    -1.1999, 0.0, -2.5898, 0.0,     0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.9755, 0.0,     0.0, 0.0,     -2.1056, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0,   0.0,  0.0,    0.0,     0.0, 0.0,     0.0,     -0.1715],
];

/// Input matrix before the `1e4` scale: thrust, then yaw, pitch and roll torques.
#[rustfmt::skip]
const QUAD_B: [[f64; QUAD_INPUTS]; QUAD_STATES] = [
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    0.0],
    [0.0015, 0.0, 0.0,    0.0],
    [0.0,    0.0, 0.0,    1.7157],
    [0.0,    0.0, 1.3949, 0.0],
    [0.0,    1.0, 0.0,    0.0],
];

const QUAD_B_SCALE: f64 = 10_000.0;

/// Tuning for [`PositionEstimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorTuning {
    /// Filter period in seconds.
    pub dt: f64,
    /// Process noise variance on every state.
    pub process_noise: f64,
    /// Measurement noise variance on position (m²).
    pub position_noise: f64,
    /// Measurement noise variance on velocity (m²/s²).
    pub velocity_noise: f64,
    /// Added to the initial covariance diagonal.
    pub initial_variance: f64,
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self {
            dt: 0.05,
            process_noise: 1e-2,
            position_noise: 1e-4,
            velocity_noise: 1e-3,
            initial_variance: 1.0,
        }
    }
}

/// Quadrotor position estimator fed with position and velocity readings.
#[derive(Debug, Clone)]
pub struct PositionEstimator {
    filter: KalmanFilter,
    input: Array1<f64>,
}

impl PositionEstimator {
    /// Create an estimator starting at `position` with `velocity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Estimation`] if `dt` is not positive.
    pub fn new(position: Position, velocity: Velocity, tuning: EstimatorTuning) -> Result<Self> {
        if !(tuning.dt > 0.0) {
            return Err(Error::estimation(format!(
                "filter period must be positive, got {}",
                tuning.dt
            )));
        }

        let continuous = Array2::from_shape_fn((QUAD_STATES, QUAD_STATES), |(i, j)| QUAD_A[i][j]);
        let a = Array2::<f64>::eye(QUAD_STATES) + continuous * tuning.dt;
        let b = Array2::from_shape_fn((QUAD_STATES, QUAD_INPUTS), |(i, j)| {
            QUAD_B[i][j] * QUAD_B_SCALE * tuning.dt
        });

        // Measure x, y, z and ẋ, ẏ, ż
        let mut c = Array2::<f64>::zeros((QUAD_OUTPUTS, QUAD_STATES));
        for i in 0..3 {
            c[[i, i]] = 1.0;
            c[[i + 3, i + 6]] = 1.0;
        }
        let d = Array2::<f64>::zeros((QUAD_OUTPUTS, QUAD_INPUTS));

        let rw = Array2::<f64>::eye(QUAD_STATES) * tuning.process_noise;
        let mut rv = Array2::<f64>::zeros((QUAD_OUTPUTS, QUAD_OUTPUTS));
        for i in 0..3 {
            rv[[i, i]] = tuning.position_noise;
            rv[[i + 3, i + 3]] = tuning.velocity_noise;
        }

        let mut x0 = Array1::<f64>::zeros(QUAD_STATES);
        for (i, (p, v)) in position
            .to_array()
            .into_iter()
            .zip(velocity.to_array())
            .enumerate()
        {
            x0[i] = p;
            x0[i + 6] = v;
        }

        let filter = KalmanFilter::new(a, b, c, d, rw, rv, x0, tuning.initial_variance)?;
        Ok(Self {
            filter,
            input: Array1::zeros(QUAD_INPUTS),
        })
    }

    /// Feed one measurement and return the estimated position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Estimation`] if the filter cannot be updated.
    pub fn estimate(&mut self, position: Position, velocity: Velocity) -> Result<Position> {
        let p = position.to_array();
        let v = velocity.to_array();
        let y = Array1::from_vec(vec![p[0], p[1], p[2], v[0], v[1], v[2]]);

        let x = self.filter.step(&y, &self.input)?;
        let estimate = Position::new(x[0], x[1], x[2]);
        trace!(measured = %position, estimated = %estimate, "Position estimate");
        Ok(estimate)
    }

    /// Current estimated position.
    #[must_use]
    pub fn position(&self) -> Position {
        let x = self.filter.state();
        Position::new(x[0], x[1], x[2])
    }

    /// Current estimated velocity.
    #[must_use]
    pub fn velocity(&self) -> Velocity {
        let x = self.filter.state();
        Velocity::new(x[6], x[7], x[8])
    }

    /// The underlying filter.
    #[must_use]
    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// 1-D constant-velocity model measuring position only.
    fn constant_velocity(dt: f64) -> KalmanFilter {
        KalmanFilter::new(
            array![[1.0, dt], [0.0, 1.0]],
            array![[0.0], [0.0]],
            array![[1.0, 0.0]],
            array![[0.0]],
            Array2::eye(2) * 1e-4,
            array![[1e-2]],
            array![0.0, 0.0],
            10.0,
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_shapes() {
        let err = KalmanFilter::new(
            Array2::eye(3),
            array![[0.0], [0.0]],
            array![[1.0, 0.0]],
            array![[0.0]],
            Array2::eye(2),
            array![[1.0]],
            array![0.0, 0.0],
            1.0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("A is 3x3"));
    }

    #[test]
    fn test_initial_covariance() {
        let kf = KalmanFilter::new(
            Array2::eye(2),
            array![[0.0], [0.0]],
            array![[1.0, 0.0]],
            array![[0.0]],
            Array2::eye(2),
            array![[1.0]],
            array![2.0, 3.0],
            0.5,
        )
        .unwrap();
        let p = kf.covariance();
        assert!((p[[0, 0]] - 4.5).abs() < 1e-12);
        assert!((p[[0, 1]] - 6.0).abs() < 1e-12);
        assert!((p[[1, 1]] - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_update_rejects_wrong_measurement_length() {
        let mut kf = constant_velocity(0.1);
        let err = kf.update(&array![1.0, 2.0], &array![0.0]).unwrap_err();
        assert!(err.to_string().contains("y has length 2"));
    }

    #[test]
    fn test_singular_innovation_is_an_error() {
        let mut kf = KalmanFilter::new(
            Array2::eye(1),
            array![[0.0]],
            array![[0.0]],
            array![[0.0]],
            array![[0.0]],
            array![[0.0]],
            array![0.0],
            0.0,
        )
        .unwrap();
        let err = kf.update(&array![1.0], &array![0.0]).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn test_tracks_constant_velocity_target() {
        let dt = 0.1;
        let mut kf = constant_velocity(dt);
        let u = array![0.0];

        for k in 1..=200 {
            let truth = 0.5 * dt * f64::from(k);
            kf.step(&array![truth], &u).unwrap();
        }

        let x = kf.state();
        assert!((x[0] - 10.0).abs() < 0.05, "position {}", x[0]);
        assert!((x[1] - 0.5).abs() < 0.05, "velocity {}", x[1]);
    }

    #[test]
    fn test_covariance_shrinks_with_measurements() {
        let mut kf = constant_velocity(0.1);
        let before = kf.covariance()[[0, 0]];
        for _ in 0..20 {
            kf.step(&array![0.0], &array![0.0]).unwrap();
        }
        let after = kf.covariance()[[0, 0]];
        assert!(after < before);
        assert!(after > 0.0);
    }

    #[test]
    fn test_estimator_rejects_zero_dt() {
        let tuning = EstimatorTuning {
            dt: 0.0,
            ..EstimatorTuning::default()
        };
        assert!(PositionEstimator::new(Position::default(), Velocity::default(), tuning).is_err());
    }

    #[test]
    fn test_estimator_dimensions() {
        let est = PositionEstimator::new(
            Position::default(),
            Velocity::default(),
            EstimatorTuning::default(),
        )
        .unwrap();
        assert_eq!(est.filter().state_dim(), QUAD_STATES);
        assert_eq!(est.filter().input_dim(), QUAD_INPUTS);
        assert_eq!(est.filter().output_dim(), QUAD_OUTPUTS);
    }

    #[test]
    fn test_estimator_converges_on_stationary_drone() {
        let mut est = PositionEstimator::new(
            Position::default(),
            Velocity::default(),
            EstimatorTuning::default(),
        )
        .unwrap();

        let truth = Position::new(1.0, -0.5, 1.2);
        let mut last = Position::default();
        for _ in 0..100 {
            last = est.estimate(truth, Velocity::default()).unwrap();
        }
        assert!(last.distance_to(&truth) < 0.02, "estimate {last}");
        assert!(last.is_finite());
    }

    #[test]
    fn test_estimator_follows_climb() {
        let tuning = EstimatorTuning::default();
        let mut est =
            PositionEstimator::new(Position::default(), Velocity::default(), tuning).unwrap();

        let climb_rate = 0.3;
        let mut truth = Position::default();
        for _ in 0..100 {
            truth.z += climb_rate * tuning.dt;
            est.estimate(truth, Velocity::new(0.0, 0.0, climb_rate))
                .unwrap();
        }
        assert!(est.position().distance_to(&truth) < 0.05);
        assert!((est.velocity().z - climb_rate).abs() < 0.05);
    }
}
