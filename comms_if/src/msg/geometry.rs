//! Geometric primitives shared by several messages.

use serde::{Deserialize, Serialize};

/// A point in 3D space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointMsg {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// An orientation as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionMsg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// A position and orientation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseMsg {
    pub position: PointMsg,
    pub orientation: QuaternionMsg,
}

/// Linear and angular velocity, expressed in the child frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwistMsg {
    pub linear: PointMsg,
    pub angular: PointMsg,
}

/// A rigid transform which takes points in `child_frame` into `frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    /// Time at which the transform was valid, in seconds
    pub stamp_s: f64,

    /// The parent (target) frame
    pub frame: String,

    /// The child (source) frame
    pub child_frame: String,

    /// Position of the child frame origin in the parent frame
    pub translation: PointMsg,

    /// Rotation of the child frame relative to the parent frame
    pub rotation: QuaternionMsg,
}

impl Default for QuaternionMsg {
    fn default() -> Self {
        Self::identity()
    }
}

impl QuaternionMsg {
    /// The identity rotation.
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    /// A pure rotation about the z axis.
    pub fn from_yaw(yaw_rad: f64) -> Self {
        let half = 0.5 * yaw_rad;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }
}

impl PoseMsg {
    /// A planar pose at `(x, y)` with the given heading.
    pub fn planar(x: f64, y: f64, yaw_rad: f64) -> Self {
        Self {
            position: PointMsg { x, y, z: 0.0 },
            orientation: QuaternionMsg::from_yaw(yaw_rad),
        }
    }
}

impl TransformStamped {
    /// A planar transform taking points from `child_frame` into `frame`.
    pub fn planar(frame: &str, child_frame: &str, x: f64, y: f64, yaw_rad: f64) -> Self {
        Self {
            stamp_s: 0.0,
            frame: frame.into(),
            child_frame: child_frame.into(),
            translation: PointMsg { x, y, z: 0.0 },
            rotation: QuaternionMsg::from_yaw(yaw_rad),
        }
    }
}
