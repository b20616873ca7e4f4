//! # Path
//!
//! The precomputed global racing lines the vehicle follows. Paths are loaded once at startup and
//! never modified.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use comms_if::msg::{Odometry, PoseMsg};
use log::info;
use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::tf::yaw_from_quaternion;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Speed given to waypoints built from a pose with no speed information
pub const DEFAULT_POSE_SPEED_MS: f64 = 0.1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point on a path, in the map frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,

    /// Units: radians
    pub heading: f64,

    /// Reference speed at this point
    ///
    /// Units: meters/second
    pub speed: f64,
}

/// A single named path, in travel order.
#[derive(Debug, Clone, Serialize)]
pub struct NamedPath {
    pub name: String,

    pub waypoints: Vec<Waypoint>,

    /// If true the last waypoint connects back to the first
    pub closed: bool,
}

/// Every candidate path for the track.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalPath {
    pub paths: Vec<NamedPath>,
}

/// Parameters describing where the paths are loaded from
#[derive(Deserialize, Debug, Clone)]
pub struct PathParams {
    /// Path files, relative to the software root unless absolute
    pub files: Vec<String>,

    /// Field delimiter used in the files
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Whether the paths form closed loops
    #[serde(default)]
    pub closed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Could not open the path file {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Could not parse record {record} of the path file: {source}")]
    Parse { record: usize, source: csv::Error },

    #[error("Path {0:?} contains no waypoints")]
    Empty(String),

    #[error("Delimiter {0:?} must be a single byte character")]
    InvalidDelimiter(char),

    #[error("No path files were given")]
    NoPaths,

    #[error("Could not find the software root: {0}")]
    SwRootNotSet(std::env::VarError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Waypoint {
    pub fn new(x: f64, y: f64, heading: f64, speed: f64) -> Self {
        Self {
            x,
            y,
            heading,
            speed,
        }
    }

    /// Build a waypoint from a pose, only the heading of the orientation is kept.
    pub fn from_pose(pose: &PoseMsg, speed: f64) -> Self {
        Self::new(
            pose.position.x,
            pose.position.y,
            yaw_from_quaternion(&pose.orientation),
            speed,
        )
    }

    /// Build a waypoint from an odometry estimate, using the forward speed.
    pub fn from_odometry(odom: &Odometry) -> Self {
        Self::from_pose(&odom.pose, odom.twist.linear.x)
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

impl NamedPath {
    /// Read headerless `x, y, heading, speed` records.
    pub fn from_reader<R: Read>(
        name: &str,
        reader: R,
        delimiter: char,
        closed: bool,
    ) -> Result<Self, PathError> {
        if !delimiter.is_ascii() {
            return Err(PathError::InvalidDelimiter(delimiter));
        }

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter as u8)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let waypoints = csv_reader
            .deserialize()
            .enumerate()
            .map(|(record, res)| res.map_err(|source| PathError::Parse { record, source }))
            .collect::<Result<Vec<Waypoint>, PathError>>()?;

        if waypoints.is_empty() {
            return Err(PathError::Empty(name.into()));
        }

        Ok(Self {
            name: name.into(),
            waypoints,
            closed,
        })
    }

    /// Load a path file, naming the path after the file stem.
    pub fn load_csv<P: AsRef<Path>>(
        path: P,
        delimiter: char,
        closed: bool,
    ) -> Result<Self, PathError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PathError::Io(path.to_path_buf(), e))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::from_reader(&name, file, delimiter, closed)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Index of the waypoint closest to the given position.
    pub fn nearest_index(&self, x: f64, y: f64) -> Option<usize> {
        self.waypoints
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| OrderedFloat((w.x - x).hypot(w.y - y)))
            .map(|(i, _)| i)
    }

    /// Index of the waypoint after `index`, wrapping on closed paths.
    pub fn next_index(&self, index: usize) -> Option<usize> {
        if index + 1 < self.len() {
            Some(index + 1)
        } else if self.closed && !self.is_empty() {
            Some(0)
        } else {
            None
        }
    }
}

impl GlobalPath {
    pub fn new(paths: Vec<NamedPath>) -> Self {
        Self { paths }
    }

    /// Load every path named in the parameters.
    pub fn load(params: &PathParams) -> Result<Self, PathError> {
        if params.files.is_empty() {
            return Err(PathError::NoPaths);
        }

        let mut paths = Vec::with_capacity(params.files.len());

        for file in params.files.iter() {
            let file_path = Path::new(file);
            let full_path = if file_path.is_absolute() {
                file_path.to_path_buf()
            } else {
                util::host::get_sw_root()
                    .map_err(PathError::SwRootNotSet)?
                    .join(file_path)
            };

            let path = NamedPath::load_csv(&full_path, params.delimiter, params.closed)?;
            info!(
                "Loaded path \"{}\" with {} waypoints",
                path.name,
                path.len()
            );
            paths.push(path);
        }

        Ok(Self { paths })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_delimiter() -> char {
    ','
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_reader() {
        let data = "0.0, 0.0, 0.0, 2.0\n1.0,0.5,0.1,2.5\n";
        let path = NamedPath::from_reader("line", data.as_bytes(), ',', false).unwrap();

        assert_eq!(path.len(), 2);
        assert_eq!(path.waypoints[1], Waypoint::new(1.0, 0.5, 0.1, 2.5));

        let semi = NamedPath::from_reader("semi", "1;2;3;4".as_bytes(), ';', true).unwrap();
        assert_eq!(semi.waypoints[0], Waypoint::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_from_reader_errors() {
        assert!(matches!(
            NamedPath::from_reader("empty", "".as_bytes(), ',', false),
            Err(PathError::Empty(_))
        ));
        assert!(matches!(
            NamedPath::from_reader("bad", "1,2,3,4\n1,2,x,4".as_bytes(), ',', false),
            Err(PathError::Parse { record: 1, .. })
        ));
        assert!(matches!(
            NamedPath::from_reader("short", "1,2,3".as_bytes(), ',', false),
            Err(PathError::Parse { record: 0, .. })
        ));
        assert!(matches!(
            NamedPath::from_reader("delim", "1,2,3,4".as_bytes(), 'é', false),
            Err(PathError::InvalidDelimiter(_))
        ));
    }

    #[test]
    fn test_load_csv() {
        let file = std::env::temp_dir().join(format!("race_path_{}.csv", std::process::id()));
        std::fs::write(&file, "0,0,0,1\n1,0,0,1\n2,0,0,1\n").unwrap();

        let path = NamedPath::load_csv(&file, ',', true).unwrap();
        assert_eq!(path.len(), 3);
        assert!(path.name.starts_with("race_path_"));

        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn test_nearest_and_next() {
        let waypoints = (0..5).map(|i| Waypoint::new(i as f64, 0.0, 0.0, 1.0)).collect();
        let mut path = NamedPath {
            name: "line".into(),
            waypoints,
            closed: false,
        };

        assert_eq!(path.nearest_index(2.2, 1.0), Some(2));
        assert_eq!(path.nearest_index(-3.0, 0.0), Some(0));
        assert_eq!(path.next_index(3), Some(4));
        assert_eq!(path.next_index(4), None);

        path.closed = true;
        assert_eq!(path.next_index(4), Some(0));
    }

    #[test]
    fn test_from_odometry() {
        let odom = Odometry {
            stamp_s: 0.0,
            frame: "map".into(),
            child_frame: "base_link".into(),
            pose: PoseMsg::planar(1.0, 2.0, 0.5),
            twist: Default::default(),
        };

        let w = Waypoint::from_odometry(&odom);
        assert_eq!((w.x, w.y), (1.0, 2.0));
        assert!((w.heading - 0.5).abs() < 1e-9);

        let w = Waypoint::from_pose(&odom.pose, DEFAULT_POSE_SPEED_MS);
        assert_eq!(w.speed, 0.1);
    }
}
