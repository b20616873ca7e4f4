//! Laser range scans

use serde::{Deserialize, Serialize};

/// A single sweep of a planar range sensor.
///
/// Ranges are ordered from `angle_min` to `angle_max` in steps of `angle_increment`. Readings may
/// be non-finite (NaN for invalid returns, infinity for no return).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Time at which the sweep was acquired, in seconds
    pub stamp_s: f64,

    /// The frame of the sensor
    pub frame: String,

    /// Angle of the first reading
    ///
    /// Units: radians
    pub angle_min: f64,

    /// Angle of the last reading
    ///
    /// Units: radians
    pub angle_max: f64,

    /// Angular distance between consecutive readings
    ///
    /// Units: radians
    pub angle_increment: f64,

    /// The range readings
    ///
    /// Units: meters
    pub ranges: Vec<f64>,
}

impl LaserScan {
    /// Build a scan spread evenly over `[angle_min, angle_max]`.
    pub fn evenly_spaced(frame: &str, angle_min: f64, angle_max: f64, ranges: Vec<f64>) -> Self {
        let angle_increment = if ranges.len() > 1 {
            (angle_max - angle_min) / ((ranges.len() - 1) as f64)
        } else {
            0.0
        };

        Self {
            stamp_s: 0.0,
            frame: frame.into(),
            angle_min,
            angle_max,
            angle_increment,
            ranges,
        }
    }

    /// Number of readings in the scan.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True if the scan contains no readings.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Angle of the reading at the given index.
    pub fn angle_of(&self, index: usize) -> f64 {
        self.angle_min + (index as f64) * self.angle_increment
    }
}
