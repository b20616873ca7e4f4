//! Occupancy grid maps

use serde::{Deserialize, Serialize};

use super::PoseMsg;

/// Information describing the layout of an occupancy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetaData {
    /// Size of each cell
    ///
    /// Units: meters/cell
    pub resolution: f64,

    /// Number of cells along the x axis
    pub width: usize,

    /// Number of cells along the y axis
    pub height: usize,

    /// Pose of the corner of cell (0, 0) in the map frame
    pub origin: PoseMsg,
}

/// A row-major occupancy grid, cell `(col, row)` is at `data[row * width + col]`.
///
/// Values are 0 for free, 100 for occupied, and -1 for unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGridMsg {
    /// Time of the snapshot, in seconds
    pub stamp_s: f64,

    /// Frame of the map
    pub frame: String,

    pub info: MapMetaData,

    pub data: Vec<i8>,
}
