//! # Race library.
//!
//! Local planner and controller for an autonomous race vehicle. This library allows the
//! executable, benchmarks and tests to access the planner's components.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Gap follower - picks candidate headings through free space in a laser scan
pub mod gap_follow;

/// Map maintenance - marks laser hits in the occupancy grid and decays them
pub mod map;

/// Model predictive control - tracks the global path
pub mod mpc;

/// Parameters of the whole planner
pub mod params;

/// Global path - waypoint sequences loaded from CSV
pub mod path;

/// Planner - owns the components and runs them on incoming messages
pub mod planner;

/// Transforms - planar rigid transforms between named frames
pub mod tf;

/// Vehicle state tracking for the ego and opponent vehicles
pub mod vehicle;

/// Waypoint selection - picks the lookahead waypoint of each path
pub mod waypoint;
