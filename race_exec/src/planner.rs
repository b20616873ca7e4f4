//! # Planner
//!
//! Owns the stores and components and runs them in response to incoming messages:
//!
//! - Scans update the occupancy grid and produce the candidate gap headings.
//! - Odometry updates the vehicle trackers.
//! - Transforms feed the transform buffer.
//! - A control cycle selects the lookahead waypoints and produces the command, from the MPC if
//!   it's enabled and succeeds, otherwise from the gap follower, otherwise a halt.
//!
//! Scan handling and control cycles can run on different threads. The grid is written under its
//! write lock and read by the waypoint selector and MPC under read locks, so neither sees a
//! partial update.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use comms_if::msg::{LaserScan, Odometry, OccupancyGridMsg, TransformStamped};
use log::{debug, warn};
use ordered_float::OrderedFloat;
use serde::Serialize;
use util::{maths::clamp, time::seconds_to_std};

use crate::{
    gap_follow::{GapError, GapFollower, GapPlan},
    map::{GridError, MapMaintainer, MapUpdateReport, OccupancyGrid},
    mpc::{CommandSource, ControlCommand, CtrlWorker, MpcCtrl, MpcError, MpcMode, OsqpSolver},
    params::{NodeParams, PlannerParams, TfParams},
    path::{GlobalPath, NamedPath},
    tf::{TfBuffer, TfCache, TfError},
    vehicle::{opponent_distance, StateTracker, TrackerError, VehicleRole, VehicleState},
    waypoint::{Selection, WaypointSelector},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Planner {
    params: NodeParams,
    tf_params: TfParams,

    /// Length of a control cycle, used to compute accelerations
    control_dt_s: f64,

    tf_buffer: Arc<TfBuffer>,
    tf: TfCache,

    grid: Arc<RwLock<OccupancyGrid>>,
    maintainer: Mutex<MapMaintainer>,

    gap_follower: Mutex<GapFollower>,
    latest_gaps: RwLock<Option<GapPlan>>,

    selector: WaypointSelector,
    paths: Vec<Arc<NamedPath>>,

    ego: StateTracker,
    opponent: StateTracker,

    mpc: Option<Mutex<CtrlWorker>>,

    last_command: Mutex<Option<ControlCommand>>,
}

/// Output of a scan update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutput {
    /// `None` if the map update was skipped
    pub map_report: Option<MapUpdateReport>,

    /// `None` if the scan couldn't be planned on
    pub gaps: Option<GapPlan>,
}

/// Output of a control cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutput {
    pub stamp_s: f64,

    pub command: ControlCommand,

    /// Best waypoint of each path
    pub selections: Vec<Option<Selection>>,

    /// Distance to the opponent, if its state is known
    ///
    /// Units: meters
    pub opponent_distance_m: Option<f64>,

    /// Final mode of the MPC cycle, if one ran
    pub mpc_mode: Option<MpcMode>,

    /// Reason the MPC wasn't used, if it was attempted
    pub mpc_error: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Transform error: {0}")]
    TfError(#[from] TfError),

    #[error("Map error: {0}")]
    GridError(#[from] GridError),

    #[error("Tracker error: {0}")]
    TrackerError(#[from] TrackerError),

    #[error("MPC error: {0}")]
    MpcError(#[from] MpcError),

    #[error("Could not start the MPC worker: {0}")]
    WorkerSpawnError(std::io::Error),

    #[error("No paths were provided")]
    NoPaths,

    #[error("No ego odometry has been received")]
    NoEgoState,

    #[error("A lock was poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Planner {
    /// Build the planner around an initial map and the loaded global path.
    pub fn new(
        params: PlannerParams,
        global_path: GlobalPath,
        grid: OccupancyGrid,
    ) -> Result<Self, PlannerError> {
        if global_path.is_empty() {
            return Err(PlannerError::NoPaths);
        }
        if grid.is_empty() {
            return Err(GridError::Empty.into());
        }

        let tf_buffer = Arc::new(TfBuffer::new(params.tf.max_age_s));
        let tf = TfCache::new(tf_buffer.clone(), seconds_to_std(params.tf.retry_sleep_s));

        let grid = Arc::new(RwLock::new(grid));

        let mpc = if params.planner.use_mpc {
            let ctrl = MpcCtrl::new(
                params.mpc.clone(),
                Box::new(OsqpSolver::new(params.mpc.solver.clone())),
            );
            let worker = CtrlWorker::spawn(
                ctrl,
                grid.clone(),
                seconds_to_std(params.planner.control_deadline_s),
            )
            .map_err(PlannerError::WorkerSpawnError)?;
            Some(Mutex::new(worker))
        } else {
            None
        };

        Ok(Self {
            selector: WaypointSelector::new(params.planner.lookahead_distance_m),
            control_dt_s: params.mpc.dt_s,
            tf_buffer,
            tf,
            grid,
            maintainer: Mutex::new(MapMaintainer::new(params.map)),
            gap_follower: Mutex::new(GapFollower::new(params.gap)),
            latest_gaps: RwLock::new(None),
            paths: global_path.paths.into_iter().map(Arc::new).collect(),
            ego: StateTracker::new(VehicleRole::Ego),
            opponent: StateTracker::new(VehicleRole::Opponent),
            mpc,
            last_command: Mutex::new(None),
            params: params.planner,
            tf_params: params.tf,
        })
    }

    /// Handle to the shared grid
    pub fn grid(&self) -> Arc<RwLock<OccupancyGrid>> {
        self.grid.clone()
    }

    /// Snapshot of the grid as a message.
    pub fn map_msg(&self, stamp_s: f64) -> Result<OccupancyGridMsg, PlannerError> {
        Ok(self.grid.read()?.to_msg(stamp_s))
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    /// Insert a transform into the buffer.
    pub fn on_transform(&self, msg: &TransformStamped) -> Result<(), PlannerError> {
        Ok(self.tf_buffer.set_transform(msg)?)
    }

    pub fn on_ego_odom(&self, odom: &Odometry) -> Result<VehicleState, PlannerError> {
        Ok(self.ego.update(odom)?)
    }

    pub fn on_opp_odom(&self, odom: &Odometry) -> Result<VehicleState, PlannerError> {
        Ok(self.opponent.update(odom)?)
    }

    /// Replace the grid with a new map. An empty map is rejected and the current grid kept.
    pub fn on_map(&self, msg: &OccupancyGridMsg) -> Result<(), PlannerError> {
        let grid = OccupancyGrid::from_msg(msg)?;
        *self.grid.write()? = grid;
        Ok(())
    }

    /// Update the map and plan gaps from a scan.
    ///
    /// If the laser to map transform isn't available at the scan's time the map update is
    /// skipped, the gap plan doesn't need it.
    pub fn on_scan(&self, scan: &LaserScan) -> Result<ScanOutput, PlannerError> {
        let map_report = match self.tf.lookup_fresh(
            &self.tf_params.map_frame,
            &self.tf_params.laser_frame,
            Some(scan.stamp_s),
        ) {
            Ok(map_laser) => {
                let mut maintainer = self.maintainer.lock()?;
                let mut grid = self.grid.write()?;
                Some(maintainer.update(&mut grid, scan, &map_laser))
            }
            Err(e) => {
                warn!("Skipping map update: {}", e);
                None
            }
        };

        let gaps = match self.gap_follower.lock()?.plan(scan) {
            Ok(plan) => Some(plan),
            Err(GapError::EmptyScan) | Err(GapError::EmptyWindow) => {
                warn!("Skipping gap planning, the scan is empty");
                None
            }
        };

        if let Some(ref g) = gaps {
            if g.headings_rad.is_empty() {
                debug!("No navigable gap in scan at {:.3} s", scan.stamp_s);
            }
        }

        *self.latest_gaps.write()? = gaps.clone();

        Ok(ScanOutput { map_report, gaps })
    }

    /// Run one control cycle.
    pub fn control_cycle(&self, stamp_s: f64) -> Result<CycleOutput, PlannerError> {
        let ego = self.ego.state()?.ok_or(PlannerError::NoEgoState)?;

        // ---- WAYPOINT SELECTION ----

        let selections = match self.tf.lookup_or_cached(
            &self.tf_params.laser_frame,
            &self.tf_params.map_frame,
            Some(stamp_s),
        ) {
            Ok(laser_map) => {
                let grid = self.grid.read()?;
                self.selector
                    .select_paths(self.paths.iter().map(|p| &**p), &laser_map, &grid)
            }
            Err(e) => {
                warn!("No map to laser transform, no waypoints selected: {}", e);
                vec![None; self.paths.len()]
            }
        };

        // The first path with a feasible waypoint is tracked
        let target = selections.iter().flatten().next().copied();

        // ---- OPPONENT ----

        let opponent_distance_m = match self.opponent.state()? {
            Some(opp) => {
                let ego_opp = self
                    .tf
                    .lookup_fresh(
                        &self.tf_params.ego_frame,
                        &self.tf_params.opp_frame,
                        Some(stamp_s),
                    )
                    .ok();
                Some(opponent_distance(ego_opp.as_ref(), &ego, &opp))
            }
            None => None,
        };

        // ---- COMMAND SELECTION ----

        let mut mpc_mode = None;
        let mut mpc_error = None;
        let mut command = None;

        if let (Some(worker), Some(sel)) = (&self.mpc, target) {
            let mut worker = worker.lock()?;
            match worker.request(self.paths[sel.path_index].clone(), ego) {
                Ok(out) => command = Some(out.command),
                Err(e) => {
                    warn!("MPC failed, falling back on reactive control: {}", e);
                    mpc_error = Some(e.to_string());
                }
            }
            mpc_mode = Some(match command {
                Some(_) => MpcMode::Apply,
                None => MpcMode::Fallback,
            });
        }

        let command = match command {
            Some(c) => c,
            None => {
                let gaps = self.latest_gaps.read()?;
                let headings = gaps
                    .as_ref()
                    .map(|g| g.headings_rad.as_slice())
                    .unwrap_or(&[]);
                match self.reactive_command(headings, target.as_ref(), &ego) {
                    Some(c) => c,
                    None => {
                        let last_steer = self
                            .last_command
                            .lock()?
                            .map(|c| c.steering_rad)
                            .unwrap_or(0.0);
                        warn!("No gap or MPC command available, halting");
                        ControlCommand::halt(last_steer, ego.velocity, self.control_dt_s)
                    }
                }
            }
        };

        *self.last_command.lock()? = Some(command);

        debug!(
            "Cycle {:.3} s: {:?} steer {:.3} rad, speed {:.2} m/s",
            stamp_s, command.source, command.steering_rad, command.speed_ms
        );

        Ok(CycleOutput {
            stamp_s,
            command,
            selections,
            opponent_distance_m,
            mpc_mode,
            mpc_error,
        })
    }

    /// Steer for the gap closest to the target waypoint's bearing (or straight ahead), blended
    /// with that bearing. `None` if there are no gaps.
    fn reactive_command(
        &self,
        headings: &[f64],
        target: Option<&Selection>,
        ego: &VehicleState,
    ) -> Option<ControlCommand> {
        let bearing = target.map(|s| s.laser_point.y.atan2(s.laser_point.x));
        let aim = bearing.unwrap_or(0.0);

        let gap = *headings
            .iter()
            .min_by_key(|h| OrderedFloat((*h - aim).abs()))?;

        let steering = match bearing {
            Some(b) => self.params.alpha * gap + (1.0 - self.params.alpha) * b,
            None => gap,
        };
        let speed_ms = match target {
            Some(s) => self.params.ref_alpha * s.waypoint.speed,
            None => self.params.reactive_speed_ms,
        };

        Some(ControlCommand {
            steering_rad: clamp(steering, -self.params.max_steer_rad, self.params.max_steer_rad),
            speed_ms,
            accel_mss: (speed_ms - ego.velocity) / self.control_dt_s,
            source: CommandSource::Reactive,
        })
    }
}

impl<G> From<PoisonError<G>> for PlannerError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::OCCUPIED, path::Waypoint};
    use comms_if::msg::{MapMetaData, PointMsg, PoseMsg, TwistMsg};
    use std::f64::consts::PI;

    fn params(use_mpc: bool) -> PlannerParams {
        let mut params: PlannerParams =
            util::params::from_str(include_str!("../../params/planner.toml")).unwrap();
        params.planner.use_mpc = use_mpc;
        params.planner.control_deadline_s = 5.0;
        params.mpc.solver.time_limit_s = None;
        params.mpc.solver.max_iter = 20000;
        params.tf.retry_sleep_s = 0.0;
        params
    }

    fn straight_path() -> GlobalPath {
        GlobalPath::new(vec![NamedPath {
            name: "straight".into(),
            waypoints: (0..=10)
                .map(|i| Waypoint::new(0.5 * i as f64, 0.0, 0.0, 2.0))
                .collect(),
            closed: false,
        }])
    }

    fn grid() -> OccupancyGrid {
        OccupancyGrid::new_free("map", 100, 100, 0.1, PoseMsg::planar(-5.0, -5.0, 0.0)).unwrap()
    }

    fn odom(x: f64, y: f64, yaw: f64, v: f64) -> Odometry {
        Odometry {
            stamp_s: 0.0,
            frame: "map".into(),
            child_frame: "ego_racecar/base_link".into(),
            pose: PoseMsg::planar(x, y, yaw),
            twist: TwistMsg {
                linear: PointMsg { x: v, y: 0.0, z: 0.0 },
                angular: PointMsg::default(),
            },
        }
    }

    fn scan(range: f64) -> LaserScan {
        LaserScan::evenly_spaced("ego_racecar/laser", -PI, PI, vec![range; 361])
    }

    fn planner(use_mpc: bool) -> Planner {
        let planner = Planner::new(params(use_mpc), straight_path(), grid()).unwrap();
        planner
            .on_transform(&TransformStamped::planar(
                "map",
                "ego_racecar/laser",
                0.0,
                0.0,
                0.0,
            ))
            .unwrap();
        planner
    }

    #[test]
    fn test_no_ego_state() {
        let planner = planner(false);
        assert!(matches!(
            planner.control_cycle(0.0),
            Err(PlannerError::NoEgoState)
        ));
    }

    #[test]
    fn test_reactive_command() {
        let planner = planner(false);

        let out = planner.on_scan(&scan(3.0)).unwrap();
        assert!(out.map_report.unwrap().num_hits > 0);
        assert!(!out.gaps.unwrap().headings_rad.is_empty());

        planner.on_ego_odom(&odom(0.0, 0.0, 0.0, 1.0)).unwrap();
        let out = planner.control_cycle(0.1).unwrap();

        let sel = out.selections[0].unwrap();
        assert_eq!(sel.waypoint_index, 3);

        assert_eq!(out.command.source, CommandSource::Reactive);
        assert!((out.command.speed_ms - 0.6 * 2.0).abs() < 1e-9);
        assert!(out.command.steering_rad.abs() <= 0.4189 + 1e-12);
        assert_eq!(out.mpc_mode, None);
        assert_eq!(out.opponent_distance_m, None);
    }

    #[test]
    fn test_stale_transform_skips_map_update() {
        let mut params = params(false);
        params.tf.max_age_s = Some(0.5);
        let planner = Planner::new(params, straight_path(), grid()).unwrap();
        planner
            .on_transform(&TransformStamped::planar(
                "map",
                "ego_racecar/laser",
                0.0,
                0.0,
                0.0,
            ))
            .unwrap();

        let mut late = scan(3.0);
        late.stamp_s = 10.0;
        let out = planner.on_scan(&late).unwrap();
        assert!(out.map_report.is_none());
        assert!(out.gaps.is_some());
        assert_eq!(planner.grid().read().unwrap().count(OCCUPIED), 0);

        // In time the map is updated
        let out = planner.on_scan(&scan(3.0)).unwrap();
        assert!(out.map_report.unwrap().num_hits > 0);
    }

    #[test]
    fn test_halt_without_gaps() {
        let planner = planner(false);
        planner.on_ego_odom(&odom(0.0, 0.0, 0.0, 1.0)).unwrap();

        let out = planner.control_cycle(0.1).unwrap();
        assert_eq!(out.command.source, CommandSource::Halt);
        assert_eq!(out.command.speed_ms, 0.0);
        assert_eq!(out.command.steering_rad, 0.0);
    }

    #[test]
    fn test_empty_map_rejected() {
        let planner = planner(false);

        let empty = OccupancyGridMsg {
            stamp_s: 0.0,
            frame: "map".into(),
            info: MapMetaData {
                resolution: 0.1,
                width: 0,
                height: 0,
                origin: PoseMsg::planar(0.0, 0.0, 0.0),
            },
            data: vec![],
        };

        assert!(planner.on_map(&empty).is_err());
        assert_eq!(planner.grid().read().unwrap().len(), 100 * 100);
    }

    #[test]
    fn test_opponent_distance() {
        let planner = planner(false);
        planner.on_ego_odom(&odom(0.0, 0.0, 0.0, 1.0)).unwrap();
        planner.on_opp_odom(&odom(3.0, 4.0, 0.0, 1.0)).unwrap();

        let out = planner.control_cycle(0.1).unwrap();
        assert!((out.opponent_distance_m.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_mpc_command() {
        let planner = planner(true);
        planner.on_scan(&scan(3.0)).unwrap();
        planner.on_ego_odom(&odom(0.0, 0.0, 0.0, 1.0)).unwrap();

        let out = planner.control_cycle(0.1).unwrap();

        assert_eq!(out.mpc_error, None);
        assert_eq!(out.mpc_mode, Some(MpcMode::Apply));
        assert_eq!(out.command.source, CommandSource::Mpc);
        assert!(out.command.steering_rad.abs() < 0.05);
    }

    #[test]
    fn test_deterministic() {
        let run = || {
            let planner = planner(false);
            planner.on_scan(&scan(3.0)).unwrap();
            planner.on_ego_odom(&odom(0.2, 0.1, 0.05, 1.5)).unwrap();
            planner.control_cycle(0.1).unwrap()
        };

        assert_eq!(run(), run());
    }
}
