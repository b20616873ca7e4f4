//! # Messages
//!
//! All messages are plain serde structures. Frames are identified by name, times are seconds.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod drive;
mod geometry;
mod map;
mod odom;
mod scan;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use drive::DriveCmd;
pub use geometry::{PointMsg, PoseMsg, QuaternionMsg, TransformStamped, TwistMsg};
pub use map::{MapMetaData, OccupancyGridMsg};
pub use odom::Odometry;
pub use scan::LaserScan;
