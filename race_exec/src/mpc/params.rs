//! MPC parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::solver::OsqpSettings;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the model predictive controller
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Number of steps in the prediction horizon
    pub horizon: usize,

    /// Length of each step
    ///
    /// Units: seconds
    pub dt_s: f64,

    /// Distance between the front and rear axles
    ///
    /// Units: meters
    pub wheelbase_m: f64,

    /// Minimum speed demand
    ///
    /// Units: meters/second
    #[serde(default)]
    pub min_speed_ms: f64,

    /// Maximum speed demand
    ///
    /// Units: meters/second
    pub max_speed_ms: f64,

    /// Steering limit, applied symmetrically
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Limit on the change in speed between steps, divided by the step length
    ///
    /// Units: meters/second^2
    pub max_acc_mss: f64,

    /// Speed used to space the reference if the path's speed is lower
    ///
    /// Units: meters/second
    pub min_ref_speed_ms: f64,

    /// State tracking weights, in order x, y, heading
    pub state_weights: [f64; 3],

    /// Multiplier applied to the state weights on the final step
    #[serde(default = "default_terminal_factor")]
    pub terminal_factor: f64,

    /// Weights on deviation from the reference input, in order speed, steering
    pub input_weights: [f64; 2],

    /// Weights on the change in input between steps, in order speed, steering
    pub input_rate_weights: [f64; 2],

    /// If set each predicted position must lie within this distance of the reference, measured
    /// normal to the reference heading
    ///
    /// Units: meters
    #[serde(default)]
    pub corridor_half_width_m: Option<f64>,

    /// Settings for the QP solver
    #[serde(default)]
    pub solver: OsqpSettings,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_terminal_factor() -> f64 {
    1.0
}
