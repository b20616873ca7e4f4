//! Drive commands

use serde::{Deserialize, Serialize};

/// Steering and speed demand for the vehicle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCmd {
    /// Time the command was produced, in seconds
    pub stamp_s: f64,

    /// Front wheel steering angle, positive to the left
    ///
    /// Units: radians
    pub steering_angle_rad: f64,

    /// Longitudinal speed demand
    ///
    /// Units: meters/second
    pub speed_ms: f64,

    /// Longitudinal acceleration implied by the speed demand
    ///
    /// Units: meters/second^2
    pub accel_mss: f64,
}
