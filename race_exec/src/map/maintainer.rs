//! # Map Maintainer
//!
//! Marks inflated scan hits into the occupancy grid and clears them again after a fixed number of
//! updates, so obstacles seen once don't block the track forever.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::LaserScan;
use log::trace;
use nalgebra::Vector2;
use serde::Serialize;

use super::{grid::OCCUPIED, MapParams, OccupancyGrid, FREE};
use crate::tf::Transform2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MapMaintainer {
    params: MapParams,

    /// Flat indices of cells marked occupied since the last decay
    new_obstacles: Vec<usize>,

    /// Number of updates since the last decay
    decay_counter: usize,
}

/// Summary of a single map update.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MapUpdateReport {
    /// Number of beams which produced a hit
    pub num_hits: usize,

    /// Number of cells which went from not occupied to occupied
    pub num_marked: usize,

    /// Number of inflated cells which fell outside the grid
    pub num_out_of_bounds: usize,

    /// Number of cells cleared by decay in this update
    pub num_decayed: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MapMaintainer {
    pub fn new(params: MapParams) -> Self {
        Self {
            params,
            new_obstacles: Vec::new(),
            decay_counter: 0,
        }
    }

    /// Mark the hits of the scan into the grid.
    ///
    /// Only the central two thirds of the beams are used. `map_laser` takes points in the laser
    /// frame into the grid's frame.
    pub fn update(
        &mut self,
        grid: &mut OccupancyGrid,
        scan: &LaserScan,
        map_laser: &Transform2,
    ) -> MapUpdateReport {
        let mut report = MapUpdateReport::default();

        let n = scan.ranges.len();
        let r = self.params.inflation_radius_cells as i64;
        let window = (2 * self.params.inflation_radius_cells + 1).pow(2);

        for i in (n / 6)..(5 * n / 6) {
            let range = scan.ranges[i];
            if !range.is_finite() {
                continue;
            }
            report.num_hits += 1;

            let theta = scan.angle_of(i);
            let hit = map_laser.apply(&Vector2::new(range * theta.cos(), range * theta.sin()));
            let (col, row) = grid.cell_of(hit.x, hit.y);

            // Clip the inflation window to the grid, far away hits leave it empty
            let c_lo = col.saturating_sub(r).max(0);
            let c_hi = col.saturating_add(r).min(grid.width() as i64 - 1);
            let r_lo = row.saturating_sub(r).max(0);
            let r_hi = row.saturating_add(r).min(grid.height() as i64 - 1);

            let in_bounds = if c_lo > c_hi || r_lo > r_hi {
                0
            } else {
                ((c_hi - c_lo + 1) * (r_hi - r_lo + 1)) as usize
            };
            report.num_out_of_bounds += window - in_bounds;

            if in_bounds == 0 {
                continue;
            }

            for rr in r_lo..=r_hi {
                for c in c_lo..=c_hi {
                    let idx = match grid.index_of(c, rr) {
                        Some(i) => i,
                        None => continue,
                    };

                    if grid.get(idx) != Some(OCCUPIED) {
                        grid.set(idx, OCCUPIED);
                        self.new_obstacles.push(idx);
                        report.num_marked += 1;
                    }
                }
            }
        }

        self.decay_counter += 1;
        if self.decay_counter > self.params.decay_period_cycles {
            for &idx in self.new_obstacles.iter() {
                grid.set(idx, FREE);
            }
            report.num_decayed = self.new_obstacles.len();

            trace!("Decayed {} obstacle cells", report.num_decayed);

            self.new_obstacles.clear();
            self.decay_counter = 0;
        }

        report
    }

    /// Cells marked since the last decay.
    pub fn new_obstacles(&self) -> &[usize] {
        &self.new_obstacles
    }

    pub fn decay_counter(&self) -> usize {
        self.decay_counter
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::PoseMsg;

    fn grid() -> OccupancyGrid {
        // 10 m x 10 m at 0.1 m, origin at (-5, -5)
        OccupancyGrid::new_free("map", 100, 100, 0.1, PoseMsg::planar(-5.0, -5.0, 0.0)).unwrap()
    }

    /// Six beams over [-pi/2, pi/2], only the middle four (indices 1..5) are used.
    fn scan(ranges: Vec<f64>) -> LaserScan {
        LaserScan::evenly_spaced(
            "laser",
            -std::f64::consts::FRAC_PI_2,
            std::f64::consts::FRAC_PI_2,
            ranges,
        )
    }

    fn maintainer(decay: usize) -> MapMaintainer {
        MapMaintainer::new(MapParams {
            inflation_radius_cells: 1,
            decay_period_cycles: decay,
        })
    }

    #[test]
    fn test_marks_inflated_hit() {
        let mut grid = grid();
        let mut mm = maintainer(50);

        // Only beam 3 (angle +pi/10, ~0.31 rad) has a finite reading
        let nan = f64::NAN;
        let inf = f64::INFINITY;
        let s = scan(vec![2.0, inf, nan, 2.0, inf, 2.0]);

        let report = mm.update(&mut grid, &s, &Transform2::identity());
        assert_eq!(report.num_hits, 1);
        assert_eq!(report.num_marked, 9);
        assert_eq!(grid.count(OCCUPIED), 9);

        let theta = s.angle_of(3);
        assert!(grid.is_occupied_at(2.0 * theta.cos(), 2.0 * theta.sin()));
    }

    #[test]
    fn test_transform_applied() {
        let mut grid = grid();
        let mut mm = maintainer(50);

        // Straight ahead reading with the laser at (1, 1) facing +y
        let s = LaserScan::evenly_spaced("laser", -0.1, 0.1, vec![1.0; 3]);
        let t = Transform2::new(1.0, 1.0, std::f64::consts::FRAC_PI_2);
        mm.update(&mut grid, &s, &t);

        // Beam 1 (angle 0) lands at (1, 2)
        assert!(grid.is_occupied_at(1.0, 2.0));
        assert!(!grid.is_occupied_at(2.0, 1.0));
    }

    #[test]
    fn test_idempotent_and_decay() {
        let mut grid = grid();

        // A pre-existing obstacle which must survive decay
        let (c, r) = grid.cell_of(-3.0, -3.0);
        let fixed = grid.index_of(c, r).unwrap();
        grid.set(fixed, OCCUPIED);

        let mut mm = maintainer(50);
        let s = scan(vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0]);

        let first = mm.update(&mut grid, &s, &Transform2::identity());
        let num_new = mm.new_obstacles().len();
        assert_eq!(first.num_marked, num_new);
        assert!(num_new > 0);

        // Marking the same cells again doesn't grow the list
        for _ in 1..50 {
            let report = mm.update(&mut grid, &s, &Transform2::identity());
            assert_eq!(report.num_marked, 0);
            assert_eq!(report.num_decayed, 0);
        }
        assert_eq!(mm.new_obstacles().len(), num_new);
        assert_eq!(mm.decay_counter(), 50);
        assert_eq!(grid.count(OCCUPIED), num_new + 1);

        // The 51st update clears every new cell but not the fixed one
        let report = mm.update(&mut grid, &s, &Transform2::identity());
        assert_eq!(report.num_decayed, num_new);
        assert_eq!(mm.decay_counter(), 0);
        assert!(mm.new_obstacles().is_empty());
        assert_eq!(grid.count(OCCUPIED), 1);
        assert_eq!(grid.get(fixed), Some(OCCUPIED));
    }

    #[test]
    fn test_edge_of_grid_not_wrapped() {
        // Single row grid, a hit in the last column must not spill onto other cells by wrapping
        let mut grid =
            OccupancyGrid::new_free("map", 5, 1, 1.0, PoseMsg::planar(0.0, 0.0, 0.0)).unwrap();
        let mut mm = maintainer(50);

        // Every beam points straight ahead
        let s = LaserScan::evenly_spaced("laser", 0.0, 0.0, vec![4.5; 6]);

        let report = mm.update(&mut grid, &s, &Transform2::new(0.0, 0.5, 0.0));
        assert_eq!(grid.count(OCCUPIED), 2);
        assert!(report.num_out_of_bounds > 0);
        assert_eq!(grid.get(0), Some(FREE));
    }

    #[test]
    fn test_far_hits_ignored() {
        let mut grid = grid();
        let mut mm = maintainer(50);

        // Finite but far beyond the grid, in both directions
        let s = scan(vec![1.0e30; 6]);
        let report = mm.update(&mut grid, &s, &Transform2::identity());
        assert_eq!(report.num_hits, 4);
        assert_eq!(report.num_marked, 0);
        assert_eq!(report.num_out_of_bounds, 4 * 9);

        let report = mm.update(&mut grid, &s, &Transform2::new(0.0, 0.0, std::f64::consts::PI));
        assert_eq!(report.num_marked, 0);
        assert_eq!(grid.count(OCCUPIED), 0);
        assert!(mm.new_obstacles().is_empty());
    }
}
