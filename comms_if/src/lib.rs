//! # Communications interface crate.
//!
//! Provides the message definitions exchanged between the planner and the outside world (sensor
//! drivers, localisation, the transform tree, and the drive actuation). The transport carrying
//! these messages is not part of this crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message definitions
pub mod msg;

/// Recorded input streams
pub mod replay;
