//! # MPC cycle
//!
//! [`MpcCtrl`] runs one control cycle as a small state machine. Each mode is handled by a
//! `mode_xyz` function which returns the mode to switch to, the cycle ends in either `Apply` or
//! `Fallback`.
//!
//! ```text
//! Idle -> BuildReference -> Linearize -> Solve -> Apply
//!              |                |          |
//!              +----------------+----------+----> Fallback
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::RwLock;

use comms_if::msg::DriveCmd;
use log::{debug, trace};
use serde::Serialize;
use util::maths::clamp;

use super::{
    dynamics::{linearize, Input, LinearizedDynamics, State},
    problem::build_qp,
    qp::QpSolver,
    reference::Reference,
    MpcError, MpcParams,
};
use crate::{map::OccupancyGrid, path::NamedPath, vehicle::VehicleState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The command sent to the vehicle for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlCommand {
    /// Units: radians
    pub steering_rad: f64,

    /// Units: meters/second
    pub speed_ms: f64,

    /// Acceleration implied by the speed demand
    ///
    /// Units: meters/second^2
    pub accel_mss: f64,

    pub source: CommandSource,
}

/// Result of a successful solve.
#[derive(Debug, Clone, Serialize)]
pub struct MpcOutput {
    pub command: ControlCommand,

    /// Predicted states over the horizon
    pub predicted: Vec<State>,

    /// Planned inputs over the horizon, only the first is applied
    pub inputs: Vec<Input>,

    pub reference: Reference,

    pub iterations: usize,

    pub solve_time_s: f64,
}

/// Status of the last cycle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MpcReport {
    pub final_mode: MpcMode,

    /// Solver iterations, zero if the solve wasn't reached
    pub iterations: usize,

    /// True if the reference passed through an occupied cell
    pub reference_blocked: bool,
}

pub struct MpcCtrl {
    params: MpcParams,

    solver: Box<dyn QpSolver>,

    /// Executing mode
    mode: MpcMode,

    report: MpcReport,

    reference: Option<Reference>,
    linear: Vec<LinearizedDynamics>,
    output: Option<MpcOutput>,
    error: Option<MpcError>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Modes of a control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MpcMode {
    Idle,
    BuildReference,
    Linearize,
    Solve,
    Apply,
    Fallback,
}

/// Which part of the planner produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandSource {
    Mpc,
    Reactive,
    Halt,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MpcMode {
    fn default() -> Self {
        Self::Idle
    }
}

impl ControlCommand {
    /// Stop, holding the given steering angle.
    pub fn halt(steering_rad: f64, speed_now_ms: f64, dt_s: f64) -> Self {
        Self {
            steering_rad,
            speed_ms: 0.0,
            accel_mss: if dt_s > 0.0 { -speed_now_ms / dt_s } else { 0.0 },
            source: CommandSource::Halt,
        }
    }

    pub fn to_msg(&self, stamp_s: f64) -> DriveCmd {
        DriveCmd {
            stamp_s,
            steering_angle_rad: self.steering_rad,
            speed_ms: self.speed_ms,
            accel_mss: self.accel_mss,
        }
    }
}

impl MpcCtrl {
    pub fn new(params: MpcParams, solver: Box<dyn QpSolver>) -> Self {
        Self {
            params,
            solver,
            mode: MpcMode::Idle,
            report: MpcReport::default(),
            reference: None,
            linear: Vec::new(),
            output: None,
            error: None,
        }
    }

    pub fn params(&self) -> &MpcParams {
        &self.params
    }

    /// Status of the last cycle
    pub fn report(&self) -> MpcReport {
        self.report
    }

    /// Run a control cycle tracking `path` from `state`.
    ///
    /// If a grid is given the reference is rejected when it passes through an occupied cell. The
    /// grid is only read locked for that check, not for the solve.
    pub fn proc(
        &mut self,
        path: &NamedPath,
        state: &VehicleState,
        grid: Option<&RwLock<OccupancyGrid>>,
    ) -> Result<MpcOutput, MpcError> {
        // Setup cycle data
        self.mode = MpcMode::Idle;
        self.report = MpcReport::default();
        self.reference = None;
        self.linear.clear();
        self.output = None;
        self.error = None;

        loop {
            let next = match self.mode {
                MpcMode::Idle => MpcMode::BuildReference,
                MpcMode::BuildReference => self.mode_build_reference(path, state, grid),
                MpcMode::Linearize => self.mode_linearize(),
                MpcMode::Solve => self.mode_solve(state),
                MpcMode::Apply | MpcMode::Fallback => break,
            };
            trace!("MPC mode {:?} -> {:?}", self.mode, next);
            self.mode = next;
        }

        self.report.final_mode = self.mode;

        match (self.mode, self.output.take()) {
            (MpcMode::Apply, Some(output)) => Ok(output),
            _ => Err(self.error.take().unwrap_or(MpcError::EmptyHorizon)),
        }
    }

    fn fallback(&mut self, error: MpcError) -> MpcMode {
        debug!("MPC falling back: {}", error);
        self.error = Some(error);
        MpcMode::Fallback
    }

    /// Sample the reference and check it's clear of obstacles.
    fn mode_build_reference(
        &mut self,
        path: &NamedPath,
        state: &VehicleState,
        grid: Option<&RwLock<OccupancyGrid>>,
    ) -> MpcMode {
        let reference = match Reference::build(path, state, &self.params) {
            Ok(r) => r,
            Err(e) => return self.fallback(e),
        };

        if let Some(grid) = grid {
            let blocked = match grid.read() {
                Ok(g) => reference.is_blocked(&g),
                Err(e) => return self.fallback(e.into()),
            };
            if blocked {
                self.report.reference_blocked = true;
                return self.fallback(MpcError::ReferenceBlocked);
            }
        }

        self.reference = Some(reference);
        MpcMode::Linearize
    }

    fn mode_linearize(&mut self) -> MpcMode {
        match self.reference {
            Some(ref r) => {
                self.linear = linearize_reference(r, &self.params);
                MpcMode::Solve
            }
            None => self.fallback(MpcError::EmptyHorizon),
        }
    }

    fn mode_solve(&mut self, state: &VehicleState) -> MpcMode {
        let reference = match self.reference.take() {
            Some(r) => r,
            None => return self.fallback(MpcError::EmptyHorizon),
        };

        match solve_linear(
            &self.linear,
            reference,
            state,
            &self.params,
            self.solver.as_ref(),
        ) {
            Ok(output) => {
                self.report.iterations = output.iterations;
                self.output = Some(output);
                MpcMode::Apply
            }
            Err(e) => self.fallback(e),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Solve for the command tracking the given reference from the current state.
pub fn control(
    reference: &Reference,
    state: &VehicleState,
    params: &MpcParams,
    solver: &dyn QpSolver,
) -> Result<MpcOutput, MpcError> {
    let linear = linearize_reference(reference, params);
    solve_linear(&linear, reference.clone(), state, params, solver)
}

/// Linearize about each step of the reference.
pub fn linearize_reference(reference: &Reference, params: &MpcParams) -> Vec<LinearizedDynamics> {
    reference
        .states
        .iter()
        .zip(reference.inputs.iter())
        .map(|(x, u)| linearize(x, u, params.dt_s, params.wheelbase_m))
        .collect()
}

fn solve_linear(
    linear: &[LinearizedDynamics],
    reference: Reference,
    state: &VehicleState,
    params: &MpcParams,
    solver: &dyn QpSolver,
) -> Result<MpcOutput, MpcError> {
    let x_now = State::new(state.x, state.y, state.theta);
    let (qp, layout) = build_qp(linear, &reference, &x_now, state.velocity, params)?;

    let solution = solver.solve(&qp)?;

    let u0 = layout.input(&solution.x, 0);
    if !u0.iter().all(|v| v.is_finite()) {
        return Err(MpcError::NonFiniteSolution);
    }

    // The solver only meets the bounds to its tolerance
    let speed_ms = clamp(u0[0], params.min_speed_ms, params.max_speed_ms);
    let steering_rad = clamp(u0[1], -params.max_steer_rad, params.max_steer_rad);

    let command = ControlCommand {
        steering_rad,
        speed_ms,
        accel_mss: (speed_ms - state.velocity) / params.dt_s,
        source: CommandSource::Mpc,
    };

    Ok(MpcOutput {
        command,
        predicted: (0..=layout.horizon)
            .map(|k| layout.state(&solution.x, k))
            .collect(),
        inputs: (0..layout.horizon)
            .map(|k| layout.input(&solution.x, k))
            .collect(),
        reference,
        iterations: solution.iterations,
        solve_time_s: solution.solve_time.as_secs_f64(),
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
