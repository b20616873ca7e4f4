//! # Waypoint Selector
//!
//! Picks the lookahead waypoint of each path: the waypoint ahead of the vehicle whose distance
//! from the laser is closest to the lookahead distance, and whose cell in the occupancy grid is
//! not occupied.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::Vector2;
use serde::Serialize;

use crate::{
    map::OccupancyGrid,
    path::{GlobalPath, NamedPath, Waypoint},
    tf::Transform2,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct WaypointSelector {
    lookahead_distance_m: f64,
}

/// The waypoint chosen on one path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Selection {
    pub path_index: usize,

    pub waypoint_index: usize,

    pub waypoint: Waypoint,

    /// Distance from the laser
    ///
    /// Units: meters
    pub distance_m: f64,

    /// Position of the waypoint in the laser frame
    pub laser_point: Vector2<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WaypointSelector {
    pub fn new(lookahead_distance_m: f64) -> Self {
        Self {
            lookahead_distance_m,
        }
    }

    pub fn lookahead_distance_m(&self) -> f64 {
        self.lookahead_distance_m
    }

    /// Select the best waypoint of every path, `None` meaning every waypoint of that path is
    /// behind the vehicle or occupied.
    ///
    /// `laser_map` takes points in the map frame into the laser frame.
    pub fn select(
        &self,
        global_path: &GlobalPath,
        laser_map: &Transform2,
        grid: &OccupancyGrid,
    ) -> Vec<Option<Selection>> {
        self.select_paths(global_path.paths.iter(), laser_map, grid)
    }

    /// As [`WaypointSelector::select`] over any sequence of paths.
    pub fn select_paths<'a, I>(
        &self,
        paths: I,
        laser_map: &Transform2,
        grid: &OccupancyGrid,
    ) -> Vec<Option<Selection>>
    where
        I: IntoIterator<Item = &'a NamedPath>,
    {
        paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| self.select_on_path(i, path, laser_map, grid))
            .collect()
    }

    fn select_on_path(
        &self,
        path_index: usize,
        path: &NamedPath,
        laser_map: &Transform2,
        grid: &OccupancyGrid,
    ) -> Option<Selection> {
        let mut best_diff = f64::INFINITY;
        let mut best = None;

        for (waypoint_index, waypoint) in path.waypoints.iter().enumerate() {
            let laser_point = laser_map.apply(&waypoint.position());

            // Only look forwards
            if laser_point.x < 0.0 {
                continue;
            }

            let distance_m = laser_point.norm();
            let diff = (self.lookahead_distance_m - distance_m).abs();

            if diff < best_diff {
                if grid.is_occupied_at(waypoint.x, waypoint.y) {
                    trace!(
                        "Waypoint {} of path {} is occupied",
                        waypoint_index,
                        path_index
                    );
                    continue;
                }

                best_diff = diff;
                best = Some(Selection {
                    path_index,
                    waypoint_index,
                    waypoint: *waypoint,
                    distance_m,
                    laser_point,
                });
            }
        }

        best
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::map::OCCUPIED;
    use comms_if::msg::PoseMsg;

    fn grid() -> OccupancyGrid {
        OccupancyGrid::new_free("map", 200, 200, 0.1, PoseMsg::planar(-10.0, -10.0, 0.0)).unwrap()
    }

    fn occupy(grid: &mut OccupancyGrid, x: f64, y: f64) {
        let (c, r) = grid.cell_of(x, y);
        let idx = grid.index_of(c, r).unwrap();
        grid.set(idx, OCCUPIED);
    }

    /// A path with waypoints at the given distances straight ahead of the vehicle
    fn path_at(distances: &[f64]) -> GlobalPath {
        GlobalPath::new(vec![NamedPath {
            name: "test".into(),
            waypoints: distances
                .iter()
                .map(|&d| Waypoint::new(d, 0.05, 0.0, 2.0))
                .collect(),
            closed: false,
        }])
    }

    fn selected_x(sel: &[Option<Selection>]) -> Option<f64> {
        sel[0].map(|s| s.waypoint.x)
    }

    #[test]
    fn test_picks_closest_to_lookahead() {
        let sel = WaypointSelector::new(2.5);
        let path = path_at(&[1.0, 2.4, 3.9]);

        let res = sel.select(&path, &Transform2::identity(), &grid());
        assert_eq!(selected_x(&res), Some(2.4));
        assert_eq!(res[0].unwrap().waypoint_index, 1);
    }

    #[test]
    fn test_occupied_waypoint_skipped() {
        let sel = WaypointSelector::new(2.5);
        let mut grid = grid();
        occupy(&mut grid, 2.4, 0.05);

        // With 2.4 rejected the best remaining match is 3.9 (1.4 from the lookahead)
        let res = sel.select(&path_at(&[1.0, 2.4, 3.9]), &Transform2::identity(), &grid);
        assert_eq!(selected_x(&res), Some(3.9));

        // Without it the 1.0 waypoint is chosen
        let res = sel.select(&path_at(&[1.0, 2.4]), &Transform2::identity(), &grid);
        assert_eq!(selected_x(&res), Some(1.0));

        occupy(&mut grid, 1.0, 0.05);
        occupy(&mut grid, 3.9, 0.05);
        let res = sel.select(&path_at(&[1.0, 2.4, 3.9]), &Transform2::identity(), &grid);
        assert_eq!(res, vec![None]);
    }

    #[test]
    fn test_behind_vehicle_ignored() {
        let sel = WaypointSelector::new(2.5);

        // Vehicle at x = 5 facing +x, everything is behind
        let laser_map = Transform2::new(5.0, 0.0, 0.0).inverse();
        let res = sel.select(&path_at(&[1.0, 2.4, 3.9]), &laser_map, &grid());
        assert_eq!(res, vec![None]);

        // Facing -x everything is ahead, 2.4 is 2.6 away and best
        let laser_map = Transform2::new(5.0, 0.0, std::f64::consts::PI).inverse();
        let res = sel.select(&path_at(&[1.0, 2.4, 3.9]), &laser_map, &grid());
        assert_eq!(selected_x(&res), Some(2.4));
        assert!(res[0].unwrap().laser_point.x > 0.0);
    }

    #[test]
    fn test_ties_keep_first() {
        let sel = WaypointSelector::new(2.5);
        let path = GlobalPath::new(vec![NamedPath {
            name: "tie".into(),
            waypoints: vec![
                Waypoint::new(2.0, 0.0, 0.0, 1.0),
                Waypoint::new(3.0, 0.0, 0.0, 1.0),
            ],
            closed: false,
        }]);

        // Both are exactly 0.5 from the lookahead
        let res = sel.select(&path, &Transform2::identity(), &grid());
        assert_eq!(selected_x(&res), Some(2.0));
    }

    #[test]
    fn test_one_result_per_path() {
        let sel = WaypointSelector::new(2.5);
        let mut global = path_at(&[1.0, 2.4]);
        global.paths.extend(path_at(&[-1.0]).paths);

        let res = sel.select(&global, &Transform2::identity(), &grid());
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].unwrap().path_index, 0);
        assert!(res[1].is_none());
    }
}
