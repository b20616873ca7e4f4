//! Planner parameters
//!
//! All parameters are loaded from a single TOML file with one table per component.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{gap_follow::GapParams, map::MapParams, mpc::MpcParams, path::PathParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Every parameter of the planner
#[derive(Deserialize, Debug, Clone)]
pub struct PlannerParams {
    pub planner: NodeParams,
    pub map: MapParams,
    pub gap: GapParams,
    pub mpc: MpcParams,
    pub tf: TfParams,
    pub path: PathParams,
}

/// Parameters of the command selection
#[derive(Deserialize, Debug, Clone)]
pub struct NodeParams {
    /// Desired distance to the tracked waypoint
    ///
    /// Units: meters
    pub lookahead_distance_m: f64,

    /// Weight of the gap heading when blending it with the waypoint bearing, `1.0` steers
    /// purely on the gap
    pub alpha: f64,

    /// Fraction of the waypoint's reference speed used under reactive control
    pub ref_alpha: f64,

    /// Use the MPC when a feasible waypoint is available
    pub use_mpc: bool,

    /// Speed used under reactive control when there is no feasible waypoint
    ///
    /// Units: meters/second
    pub reactive_speed_ms: f64,

    /// Steering limit applied to reactive commands
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Longest time a control cycle waits for the MPC
    ///
    /// Units: seconds
    pub control_deadline_s: f64,

    /// Save a snapshot of the grid every this many scans, never if zero
    #[serde(default)]
    pub map_save_period_scans: usize,
}

/// Frame names and transform lookup behaviour
#[derive(Deserialize, Debug, Clone)]
pub struct TfParams {
    pub map_frame: String,
    pub laser_frame: String,
    pub ego_frame: String,
    pub opp_frame: String,

    /// Sleep before retrying a failed lookup
    ///
    /// Units: seconds
    pub retry_sleep_s: f64,

    /// Lookups at a given time fail if the transform is older than this
    ///
    /// Units: seconds
    #[serde(default)]
    pub max_age_s: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params_file_parses() {
        let params: PlannerParams =
            util::params::from_str(include_str!("../../params/planner.toml")).unwrap();

        assert!(params.planner.lookahead_distance_m > 0.0);
        assert_eq!(params.map.decay_period_cycles, 50);
        assert_eq!(params.gap.truncation_span_rad, std::f64::consts::PI);
        assert!(params.mpc.horizon > 0);
        assert_eq!(params.path.delimiter, ',');
    }
}
