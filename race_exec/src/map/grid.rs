//! # Occupancy Grid
//!
//! A binary occupancy grid with the metadata needed to go between world positions and cells.
//! Cells are stored row-major, so the flat index of cell `(col, row)` is `row * width + col`,
//! matching [`OccupancyGridMsg::data`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::{MapMetaData, OccupancyGridMsg, PoseMsg};
use ndarray::Array2;
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of a free cell
pub const FREE: i8 = 0;

/// Value of an occupied cell
pub const OCCUPIED: i8 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyGrid {
    /// Frame the grid is expressed in
    pub frame: String,

    /// Size of each (square) cell
    ///
    /// Units: meters/cell
    pub resolution: f64,

    /// World pose of the corner of cell (0, 0). Any rotation is ignored.
    pub origin: PoseMsg,

    /// Cell values with shape (height, width)
    data: Array2<i8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("The map is empty")]
    Empty,

    #[error("Map data has {actual} cells but the metadata describes {width} x {height}")]
    SizeMismatch {
        width: usize,
        height: usize,
        actual: usize,
    },

    #[error("Map resolution must be positive, got {0}")]
    InvalidResolution(f64),

    #[error("Map data could not be reshaped: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OccupancyGrid {
    /// Create a grid with every cell free.
    pub fn new_free(
        frame: &str,
        width: usize,
        height: usize,
        resolution: f64,
        origin: PoseMsg,
    ) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::Empty);
        }
        if !(resolution > 0.0) {
            return Err(GridError::InvalidResolution(resolution));
        }

        Ok(Self {
            frame: frame.into(),
            resolution,
            origin,
            data: Array2::from_elem((height, width), FREE),
        })
    }

    /// Build the grid from a map message, checking that the data matches the metadata.
    pub fn from_msg(msg: &OccupancyGridMsg) -> Result<Self, GridError> {
        let info = &msg.info;

        if msg.data.is_empty() || info.width == 0 || info.height == 0 {
            return Err(GridError::Empty);
        }
        if msg.data.len() != info.width * info.height {
            return Err(GridError::SizeMismatch {
                width: info.width,
                height: info.height,
                actual: msg.data.len(),
            });
        }
        if !(info.resolution > 0.0) {
            return Err(GridError::InvalidResolution(info.resolution));
        }

        Ok(Self {
            frame: msg.frame.clone(),
            resolution: info.resolution,
            origin: info.origin,
            data: Array2::from_shape_vec((info.height, info.width), msg.data.clone())?,
        })
    }

    /// Snapshot the grid as a message.
    pub fn to_msg(&self, stamp_s: f64) -> OccupancyGridMsg {
        OccupancyGridMsg {
            stamp_s,
            frame: self.frame.clone(),
            info: MapMetaData {
                resolution: self.resolution,
                width: self.width(),
                height: self.height(),
                origin: self.origin,
            },
            data: self.data.iter().copied().collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Number of cells in the grid
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the (possibly out of bounds) cell containing the given world position.
    pub fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        (
            ((x - self.origin.position.x) / self.resolution).floor() as i64,
            ((y - self.origin.position.y) / self.resolution).floor() as i64,
        )
    }

    /// Get the flat index of a cell, or `None` if the cell is outside the grid.
    ///
    /// Columns and rows are checked separately so a cell off one side of the grid never wraps
    /// onto the next row.
    pub fn index_of(&self, col: i64, row: i64) -> Option<usize> {
        if col < 0 || row < 0 || col as usize >= self.width() || row as usize >= self.height() {
            None
        } else {
            Some(row as usize * self.width() + col as usize)
        }
    }

    /// Get the value at a flat index.
    pub fn get(&self, index: usize) -> Option<i8> {
        if index >= self.len() {
            return None;
        }
        self.data.get((index / self.width(), index % self.width())).copied()
    }

    /// Set the value at a flat index, returning the previous value or `None` if the index is out
    /// of bounds (in which case nothing is written).
    pub fn set(&mut self, index: usize, value: i8) -> Option<i8> {
        if index >= self.len() {
            return None;
        }
        let width = self.width();
        self.data
            .get_mut((index / width, index % width))
            .map(|cell| std::mem::replace(cell, value))
    }

    /// Whether the cell containing the world position is occupied. Positions outside the grid are
    /// treated as occupied.
    pub fn is_occupied_at(&self, x: f64, y: f64) -> bool {
        let (col, row) = self.cell_of(x, y);
        match self.index_of(col, row).and_then(|i| self.get(i)) {
            Some(v) => v == OCCUPIED,
            None => true,
        }
    }

    /// Count the cells with the given value.
    pub fn count(&self, value: i8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn msg(width: usize, height: usize, data: Vec<i8>) -> OccupancyGridMsg {
        OccupancyGridMsg {
            stamp_s: 0.0,
            frame: "map".into(),
            info: MapMetaData {
                resolution: 0.5,
                width,
                height,
                origin: PoseMsg::planar(-1.0, -1.0, 0.0),
            },
            data,
        }
    }

    #[test]
    fn test_from_msg_checks() {
        assert!(matches!(
            OccupancyGrid::from_msg(&msg(2, 2, vec![])),
            Err(GridError::Empty)
        ));
        assert!(matches!(
            OccupancyGrid::from_msg(&msg(2, 2, vec![0; 3])),
            Err(GridError::SizeMismatch { actual: 3, .. })
        ));

        let m = msg(3, 2, vec![0, 1, 2, 3, 4, 5]);
        let grid = OccupancyGrid::from_msg(&m).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);

        // Flat indexing matches the message layout
        assert_eq!(grid.get(4), Some(4));
        assert_eq!(grid.index_of(1, 1), Some(4));
        assert_eq!(grid.to_msg(0.0), m);
    }

    #[test]
    fn test_cells_and_bounds() {
        let mut grid = OccupancyGrid::new_free("map", 4, 4, 0.5, PoseMsg::planar(-1.0, -1.0, 0.0))
            .unwrap();

        assert_eq!(grid.cell_of(-1.0, -1.0), (0, 0));
        assert_eq!(grid.cell_of(-0.01, 0.99), (1, 3));
        assert_eq!(grid.cell_of(-1.01, 0.0), (-1, 2));

        assert_eq!(grid.index_of(-1, 0), None);
        assert_eq!(grid.index_of(4, 0), None);
        assert_eq!(grid.index_of(0, 4), None);
        assert_eq!(grid.index_of(3, 3), Some(15));

        assert_eq!(grid.set(16, OCCUPIED), None);
        assert_eq!(grid.count(OCCUPIED), 0);

        assert_eq!(grid.set(5, OCCUPIED), Some(FREE));
        assert!(grid.is_occupied_at(-0.25, -0.25));
        assert!(!grid.is_occupied_at(0.25, 0.25));

        // Outside the map counts as occupied
        assert!(grid.is_occupied_at(5.0, 0.0));
    }
}
