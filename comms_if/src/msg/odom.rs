//! Odometry

use serde::{Deserialize, Serialize};

use super::{PoseMsg, TwistMsg};

/// A pose and velocity estimate of a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    /// Time of the estimate, in seconds
    pub stamp_s: f64,

    /// Frame the pose is expressed in
    pub frame: String,

    /// Frame of the vehicle body, which the twist is expressed in
    pub child_frame: String,

    /// Pose of the vehicle
    pub pose: PoseMsg,

    /// Velocity of the vehicle
    pub twist: TwistMsg,
}
