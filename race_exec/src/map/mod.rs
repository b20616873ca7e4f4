//! # Map
//!
//! The occupancy grid store and the maintainer which marks scan hits into it.
//!
//! The grid is shared between the scan handler, which is the only writer, and the waypoint
//! selector and MPC, which take read locks for the duration of their computation.

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

/// Implements the [`OccupancyGrid`] type
mod grid;

/// Implements the [`MapMaintainer`]
mod maintainer;

/// Parameters for map maintenance
mod params;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use grid::{GridError, OccupancyGrid, FREE, OCCUPIED};
pub use maintainer::{MapMaintainer, MapUpdateReport};
pub use params::Params as MapParams;
