//! # Reference trajectory
//!
//! Samples the path ahead of the vehicle at the spacing it would cover in one step, producing the
//! states the MPC tracks and the inputs it linearizes about.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use util::maths::{clamp, lerp, unwrap_near};

use super::{
    dynamics::{Input, State},
    MpcError, MpcParams,
};
use crate::{map::OccupancyGrid, path::NamedPath, vehicle::VehicleState};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Steps shorter than this give a zero steering reference
const MIN_STEP_M: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Reference states and inputs over the horizon. There is one more state than inputs, input `k`
/// takes state `k` to state `k + 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub states: Vec<State>,
    pub inputs: Vec<Input>,
}

/// A position along a path, as a segment index and distance along that segment.
struct PathCursor<'a> {
    path: &'a NamedPath,
    index: usize,
    along_m: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Reference {
    /// Build the reference from the waypoint nearest the vehicle.
    pub fn build(
        path: &NamedPath,
        state: &VehicleState,
        params: &MpcParams,
    ) -> Result<Self, MpcError> {
        let start = path
            .nearest_index(state.x, state.y)
            .ok_or(MpcError::EmptyPath)?;

        let mut cursor = PathCursor {
            path,
            index: start,
            along_m: 0.0,
        };

        let (first, _) = cursor.sample();
        let mut prev_heading = unwrap_near(first[2], state.theta);
        let mut states = vec![State::new(first[0], first[1], prev_heading)];

        for _ in 0..params.horizon {
            let (_, speed) = cursor.sample();
            cursor.advance(speed.max(params.min_ref_speed_ms) * params.dt_s);

            let (s, _) = cursor.sample();
            prev_heading = unwrap_near(s[2], prev_heading);
            states.push(State::new(s[0], s[1], prev_heading));
        }

        let inputs = states
            .windows(2)
            .map(|w| {
                let step = (w[1] - w[0]).xy().norm();
                let speed = clamp(step / params.dt_s, params.min_speed_ms, params.max_speed_ms);
                let steer = if step > MIN_STEP_M {
                    (params.wheelbase_m * (w[1][2] - w[0][2]) / step).atan()
                } else {
                    0.0
                };
                Input::new(
                    speed,
                    clamp(steer, -params.max_steer_rad, params.max_steer_rad),
                )
            })
            .collect();

        Ok(Self { states, inputs })
    }

    /// Number of steps
    pub fn horizon(&self) -> usize {
        self.inputs.len()
    }

    /// True if any reference position is occupied or outside the grid.
    pub fn is_blocked(&self, grid: &OccupancyGrid) -> bool {
        self.states.iter().any(|s| grid.is_occupied_at(s[0], s[1]))
    }
}

impl<'a> PathCursor<'a> {
    /// Interpolated `[x, y, heading]` and speed at the cursor.
    fn sample(&self) -> (State, f64) {
        let a = &self.path.waypoints[self.index];
        let b = match self.path.next_index(self.index) {
            Some(i) => &self.path.waypoints[i],
            None => return (State::new(a.x, a.y, a.heading), a.speed),
        };

        let len = (b.position() - a.position()).norm();
        let t = if len > 0.0 { self.along_m / len } else { 0.0 };

        (
            State::new(
                lerp(a.x, b.x, t),
                lerp(a.y, b.y, t),
                lerp(a.heading, unwrap_near(b.heading, a.heading), t),
            ),
            lerp(a.speed, b.speed, t),
        )
    }

    /// Move the cursor forward along the path, stopping at the end of open paths.
    fn advance(&mut self, mut dist_m: f64) {
        // Bounded so a closed path of zero length can't spin forever
        for _ in 0..=self.path.len() {
            let next = match self.path.next_index(self.index) {
                Some(n) => n,
                None => {
                    self.along_m = 0.0;
                    return;
                }
            };

            let len = (self.path.waypoints[next].position()
                - self.path.waypoints[self.index].position())
            .norm();
            let remaining = len - self.along_m;

            if dist_m < remaining {
                self.along_m += dist_m;
                return;
            }

            dist_m -= remaining;
            self.index = next;
            self.along_m = 0.0;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::OCCUPIED, mpc::test_params, path::Waypoint};
    use comms_if::msg::PoseMsg;
    use std::f64::consts::PI;

    fn straight(closed: bool) -> NamedPath {
        NamedPath {
            name: "straight".into(),
            waypoints: (0..10)
                .map(|i| Waypoint::new(i as f64, 0.0, 0.0, 2.0))
                .collect(),
            closed,
        }
    }

    fn state(x: f64, y: f64, theta: f64) -> VehicleState {
        VehicleState {
            x,
            y,
            theta,
            ..Default::default()
        }
    }

    #[test]
    fn test_straight_spacing() {
        let params = test_params(4);
        let r = Reference::build(&straight(false), &state(2.2, 0.3, 0.0), &params).unwrap();

        assert_eq!(r.states.len(), 5);
        assert_eq!(r.horizon(), 4);

        // Starts at the nearest waypoint and steps 2 m/s * 0.1 s
        for (k, s) in r.states.iter().enumerate() {
            assert!((s[0] - (2.0 + 0.2 * k as f64)).abs() < 1e-9);
            assert!(s[1].abs() < 1e-12);
        }
        for u in r.inputs.iter() {
            assert!((u[0] - 2.0).abs() < 1e-9);
            assert!(u[1].abs() < 1e-12);
        }
    }

    #[test]
    fn test_open_path_end_holds() {
        let params = test_params(10);
        let r = Reference::build(&straight(false), &state(8.9, 0.0, 0.0), &params).unwrap();

        let last = r.states.last().unwrap();
        assert!((last[0] - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_path_wraps_and_unwraps() {
        // Square loop, corner headings wrap through +-pi
        let waypoints = vec![
            Waypoint::new(0.0, 0.0, 0.0, 10.0),
            Waypoint::new(1.0, 0.0, PI / 2.0, 10.0),
            Waypoint::new(1.0, 1.0, PI, 10.0),
            Waypoint::new(0.0, 1.0, -PI / 2.0, 10.0),
        ];
        let path = NamedPath {
            name: "loop".into(),
            waypoints,
            closed: true,
        };

        let mut params = test_params(5);
        params.max_speed_ms = 20.0;
        let r = Reference::build(&path, &state(0.0, 1.0, -PI / 2.0), &params).unwrap();

        // 1 m per step goes round the whole loop and back to the start
        assert!((r.states[1] - State::new(0.0, 0.0, 0.0)).xy().norm() < 1e-9);
        assert!((r.states[5] - r.states[1]).xy().norm() < 1e-9);

        // Heading increases monotonically without jumping by 2 pi
        for w in r.states.windows(2) {
            assert!(w[1][2] - w[0][2] > 0.0);
            assert!(w[1][2] - w[0][2] < PI);
        }
    }

    #[test]
    fn test_blocked() {
        let params = test_params(4);
        let r = Reference::build(&straight(false), &state(2.0, 0.0, 0.0), &params).unwrap();

        let mut grid =
            OccupancyGrid::new_free("map", 100, 40, 0.1, PoseMsg::planar(0.0, -2.0, 0.0)).unwrap();
        assert!(!r.is_blocked(&grid));

        // Obstacle straddling the third reference sample at x = 2.4
        for &x in &[2.35, 2.45] {
            let (c, row) = grid.cell_of(x, 0.0);
            let idx = grid.index_of(c, row).unwrap();
            grid.set(idx, OCCUPIED);
        }
        assert!(r.is_blocked(&grid));
    }

    #[test]
    fn test_empty_path() {
        let path = NamedPath {
            name: "empty".into(),
            waypoints: vec![],
            closed: false,
        };
        assert!(matches!(
            Reference::build(&path, &state(0.0, 0.0, 0.0), &test_params(3)),
            Err(MpcError::EmptyPath)
        ));
    }
}
