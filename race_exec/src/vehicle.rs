//! # Vehicle
//!
//! State trackers for the ego vehicle and its opponent. Both follow the same update rule, the
//! latest odometry sample overwrites the state with no filtering or interpolation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{PoisonError, RwLock};

use comms_if::msg::Odometry;
use nalgebra::Vector2;
use serde::Serialize;

use crate::tf::{yaw_from_quaternion, Transform2};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Planar state of a vehicle in the map frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,

    /// Heading
    ///
    /// Units: radians
    pub theta: f64,

    /// Forward speed
    ///
    /// Units: meters/second
    pub velocity: f64,

    /// Yaw rate
    ///
    /// Units: radians/second
    pub angular_velocity: f64,
}

/// A vehicle's state along with what it is and when it was last updated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackedVehicle {
    pub role: VehicleRole,

    pub state: VehicleState,

    /// Stamp of the last odometry sample
    pub stamp_s: f64,

    /// Number of samples received
    pub updates: u64,
}

/// Holds the latest state of one vehicle. Writers are serialised by the lock, readers always see
/// a complete sample.
#[derive(Debug)]
pub struct StateTracker {
    inner: RwLock<TrackedVehicle>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VehicleRole {
    Ego,
    Opponent,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("The tracker lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleState {
    pub fn from_odometry(odom: &Odometry) -> Self {
        Self {
            x: odom.pose.position.x,
            y: odom.pose.position.y,
            theta: yaw_from_quaternion(&odom.pose.orientation),
            velocity: odom.twist.linear.x,
            angular_velocity: odom.twist.angular.z,
        }
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

impl StateTracker {
    pub fn new(role: VehicleRole) -> Self {
        Self {
            inner: RwLock::new(TrackedVehicle {
                role,
                state: VehicleState::default(),
                stamp_s: 0.0,
                updates: 0,
            }),
        }
    }

    /// Overwrite the state with the given sample.
    pub fn update(&self, odom: &Odometry) -> Result<VehicleState, TrackerError> {
        let mut inner = self.inner.write()?;
        inner.state = VehicleState::from_odometry(odom);
        inner.stamp_s = odom.stamp_s;
        inner.updates += 1;
        Ok(inner.state)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<TrackedVehicle, TrackerError> {
        Ok(*self.inner.read()?)
    }

    /// The current state if at least one sample has been received.
    pub fn state(&self) -> Result<Option<VehicleState>, TrackerError> {
        let inner = self.inner.read()?;
        Ok(if inner.updates > 0 {
            Some(inner.state)
        } else {
            None
        })
    }
}

impl<G> From<PoisonError<G>> for TrackerError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Distance to the opponent. The transform from the opponent's body frame into the ego body frame
/// is preferred, otherwise the states are compared.
pub fn opponent_distance(
    ego_opp: Option<&Transform2>,
    ego: &VehicleState,
    opp: &VehicleState,
) -> f64 {
    match ego_opp {
        Some(t) => t.translation.norm(),
        None => (opp.position() - ego.position()).norm(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::{PointMsg, PoseMsg, TwistMsg};

    fn odom(stamp_s: f64, x: f64, y: f64, yaw: f64, v: f64) -> Odometry {
        Odometry {
            stamp_s,
            frame: "map".into(),
            child_frame: "base_link".into(),
            pose: PoseMsg::planar(x, y, yaw),
            twist: TwistMsg {
                linear: PointMsg { x: v, y: 0.0, z: 0.0 },
                angular: PointMsg {
                    x: 0.0,
                    y: 0.0,
                    z: 0.3,
                },
            },
        }
    }

    #[test]
    fn test_tracker_overwrites() {
        let tracker = StateTracker::new(VehicleRole::Opponent);
        assert_eq!(tracker.state().unwrap(), None);

        tracker.update(&odom(1.0, 1.0, 2.0, 0.4, 3.0)).unwrap();
        tracker.update(&odom(2.0, 5.0, 6.0, -0.4, 1.0)).unwrap();

        let snap = tracker.snapshot().unwrap();
        assert_eq!(snap.role, VehicleRole::Opponent);
        assert_eq!(snap.updates, 2);
        assert_eq!(snap.stamp_s, 2.0);
        assert_eq!(snap.state.x, 5.0);
        assert_eq!(snap.state.velocity, 1.0);
        assert_eq!(snap.state.angular_velocity, 0.3);
        assert!((snap.state.theta + 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_opponent_distance() {
        let ego = VehicleState::from_odometry(&odom(0.0, 0.0, 0.0, 0.0, 0.0));
        let opp = VehicleState::from_odometry(&odom(0.0, 3.0, 4.0, 0.0, 0.0));

        assert_eq!(opponent_distance(None, &ego, &opp), 5.0);

        let t = Transform2::new(6.0, 8.0, 1.0);
        assert_eq!(opponent_distance(Some(&t), &ego, &opp), 10.0);
    }
}
