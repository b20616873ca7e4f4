//! # Replay
//!
//! A recording is a text file with one JSON encoded [`InputMsg`] per line. Blank lines and lines
//! starting with `#` are ignored.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::msg::{LaserScan, Odometry, OccupancyGridMsg, TransformStamped};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Any message the planner can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputMsg {
    /// A range scan from the ego vehicle's laser
    Scan(LaserScan),

    /// Odometry of the ego vehicle
    EgoOdom(Odometry),

    /// Odometry of the opponent vehicle
    OppOdom(Odometry),

    /// A transform tree update
    Transform(TransformStamped),

    /// The static map
    Map(OccupancyGridMsg),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Couldn't read the recording: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line} of the recording is not a valid message: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read all messages from a recording.
pub fn read_recording<R: BufRead>(reader: R) -> Result<Vec<InputMsg>, ReplayError> {
    let mut msgs = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let msg = serde_json::from_str(trimmed)
            .map_err(|source| ReplayError::Parse { line: i + 1, source })?;
        msgs.push(msg);
    }

    Ok(msgs)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
