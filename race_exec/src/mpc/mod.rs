//! # Model Predictive Control
//!
//! Tracks the global path with a receding horizon controller. Every cycle:
//!
//! 1. A reference is sampled along the path from the waypoint nearest the vehicle
//!    ([`Reference`]).
//! 2. The kinematic bicycle model is linearized about each reference sample
//!    ([`dynamics::linearize`]).
//! 3. A QP over the horizon is built ([`problem::build_qp`]) and solved with a [`QpSolver`],
//!    normally [`OsqpSolver`].
//! 4. The first input of the solution is applied and the rest discarded.
//!
//! Any failure along the way, including the solver running out of iterations or time, is
//! reported as an [`MpcError`] and the caller falls back on reactive control.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod ctrl;
pub mod dynamics;
mod params;
pub mod problem;
pub mod qp;
pub mod reference;
pub mod solver;
pub mod worker;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use ctrl::{control, CommandSource, ControlCommand, MpcCtrl, MpcMode, MpcOutput, MpcReport};
pub use dynamics::{Input, LinearizedDynamics, State};
pub use params::Params as MpcParams;
pub use qp::{QpError, QpProblem, QpSolution, QpSolver};
pub use reference::Reference;
pub use solver::{OsqpSettings, OsqpSolver};
pub use worker::CtrlWorker;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MpcError {
    #[error("The path has no waypoints")]
    EmptyPath,

    #[error("The horizon has no steps")]
    EmptyHorizon,

    #[error(
        "Horizon of {expected} steps doesn't match {linear} linear models and {states} states"
    )]
    HorizonMismatch {
        expected: usize,
        linear: usize,
        states: usize,
    },

    #[error("The reference trajectory passes through an occupied cell")]
    ReferenceBlocked,

    #[error("QP solve failed: {0}")]
    Solver(#[from] QpError),

    #[error("The solver returned a non-finite input")]
    NonFiniteSolution,

    #[error("No solution for cycle {cycle} within the {deadline_s} s deadline")]
    DeadlineMissed { cycle: u64, deadline_s: f64 },

    #[error("The controller worker has stopped")]
    WorkerStopped,

    #[error("A lock was poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<G> From<std::sync::PoisonError<G>> for MpcError {
    fn from(_: std::sync::PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// TEST HELPERS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) fn test_params(horizon: usize) -> MpcParams {
    MpcParams {
        horizon,
        dt_s: 0.1,
        wheelbase_m: 0.33,
        min_speed_ms: 0.0,
        max_speed_ms: 5.0,
        max_steer_rad: 0.4,
        max_acc_mss: 5.0,
        min_ref_speed_ms: 0.5,
        state_weights: [10.0, 10.0, 1.0],
        terminal_factor: 2.0,
        input_weights: [0.1, 0.1],
        input_rate_weights: [0.1, 1.0],
        corridor_half_width_m: None,
        solver: OsqpSettings {
            eps_abs: 1e-6,
            eps_rel: 1e-6,
            max_iter: 20000,
            ..Default::default()
        },
    }
}
