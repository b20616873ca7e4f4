//! # Vehicle dynamics
//!
//! Kinematic bicycle model with state `[x, y, heading]` and input `[speed, steering]`:
//!
//! ```text
//! x'     = v cos(theta)
//! y'     = v sin(theta)
//! theta' = v tan(delta) / L
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix3, Matrix3x2, Vector2, Vector3};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of states
pub const NX: usize = 3;

/// Number of inputs
pub const NU: usize = 2;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// `[x, y, heading]`
pub type State = Vector3<f64>;

/// `[speed, steering]`
pub type Input = Vector2<f64>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Discrete time affine model `x[k+1] = ad x[k] + bd u[k] + hd`, valid near the operating point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearizedDynamics {
    pub ad: Matrix3<f64>,
    pub bd: Matrix3x2<f64>,
    pub hd: Vector3<f64>,
    pub x_op: State,
    pub u_op: Input,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LinearizedDynamics {
    /// Predict the next state with the linear model.
    pub fn predict(&self, x: &State, u: &Input) -> State {
        self.ad * x + self.bd * u + self.hd
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Continuous time state derivative.
pub fn derivative(x: &State, u: &Input, wheelbase_m: f64) -> State {
    let (v, delta) = (u[0], u[1]);
    Vector3::new(
        v * x[2].cos(),
        v * x[2].sin(),
        v * delta.tan() / wheelbase_m,
    )
}

/// Step the nonlinear model forward by `dt` with a forward Euler step.
pub fn propagate(x: &State, u: &Input, dt: f64, wheelbase_m: f64) -> State {
    x + dt * derivative(x, u, wheelbase_m)
}

/// Linearize the model about the operating point and discretise with a forward Euler step.
pub fn linearize(x_op: &State, u_op: &Input, dt: f64, wheelbase_m: f64) -> LinearizedDynamics {
    let (v, delta) = (u_op[0], u_op[1]);
    let (s, c) = x_op[2].sin_cos();
    let cos_d = delta.cos();

    #[rustfmt::skip]
    let a_c = Matrix3::new(
        0.0, 0.0, -v * s,
        0.0, 0.0,  v * c,
        0.0, 0.0,  0.0,
    );

    #[rustfmt::skip]
    let b_c = Matrix3x2::new(
        c,                         0.0,
        s,                         0.0,
        delta.tan() / wheelbase_m, v / (wheelbase_m * cos_d * cos_d),
    );

    let ad = Matrix3::identity() + dt * a_c;
    let bd = dt * b_c;
    let hd = propagate(x_op, u_op, dt, wheelbase_m) - ad * x_op - bd * u_op;

    LinearizedDynamics {
        ad,
        bd,
        hd,
        x_op: *x_op,
        u_op: *u_op,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
