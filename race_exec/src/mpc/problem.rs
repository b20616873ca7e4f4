//! # MPC problem construction
//!
//! Assembles the horizon QP from the linearized dynamics and the reference. The decision vector
//! is all predicted states followed by all inputs:
//!
//! ```text
//! [x_0, x_1, ..., x_N, u_0, u_1, ..., u_N-1]
//! ```
//!
//! Constraint rows, in order:
//! 1. Initial state, `x_0` equals the measured state
//! 2. Dynamics, `x_k+1 - Ad_k x_k - Bd_k u_k = hd_k`
//! 3. Input bounds on speed and steering
//! 4. Acceleration, the change in speed between steps (and from the measured speed, clamped to
//!    the speed bounds) is limited to `max_acc * dt`
//! 5. Corridor (optional), each predicted position lies within a band about the reference

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};
use util::maths::clamp;

use super::{
    dynamics::{Input, LinearizedDynamics, State, NU, NX},
    qp::QpProblem,
    reference::Reference,
    MpcError, MpcParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Index layout of the decision vector.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub horizon: usize,
}

/// Accumulates constraint rows.
struct RowBuilder {
    a: DMatrix<f64>,
    l: DVector<f64>,
    u: DVector<f64>,
    next: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Layout {
    pub fn num_vars(&self) -> usize {
        NX * (self.horizon + 1) + NU * self.horizon
    }

    /// Index of the first element of state `k`
    pub fn x(&self, k: usize) -> usize {
        NX * k
    }

    /// Index of the first element of input `k`
    pub fn u(&self, k: usize) -> usize {
        NX * (self.horizon + 1) + NU * k
    }

    pub fn state(&self, z: &DVector<f64>, k: usize) -> State {
        let i = self.x(k);
        State::new(z[i], z[i + 1], z[i + 2])
    }

    pub fn input(&self, z: &DVector<f64>, k: usize) -> Input {
        let i = self.u(k);
        Input::new(z[i], z[i + 1])
    }
}

impl RowBuilder {
    fn new(num_rows: usize, num_vars: usize) -> Self {
        Self {
            a: DMatrix::zeros(num_rows, num_vars),
            l: DVector::zeros(num_rows),
            u: DVector::zeros(num_rows),
            next: 0,
        }
    }

    /// Add a row with the given (column, coefficient) pairs.
    fn row(&mut self, coeffs: &[(usize, f64)], lower: f64, upper: f64) {
        for &(col, val) in coeffs {
            self.a[(self.next, col)] += val;
        }
        self.l[self.next] = lower;
        self.u[self.next] = upper;
        self.next += 1;
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the QP for one control cycle.
///
/// `linear[k]` must describe the step from state `k` to state `k + 1`.
pub fn build_qp(
    linear: &[LinearizedDynamics],
    reference: &Reference,
    x_now: &State,
    v_now: f64,
    params: &MpcParams,
) -> Result<(QpProblem, Layout), MpcError> {
    let n_steps = reference.horizon();
    if n_steps == 0 {
        return Err(MpcError::EmptyHorizon);
    }
    if linear.len() != n_steps || reference.states.len() != n_steps + 1 {
        return Err(MpcError::HorizonMismatch {
            expected: n_steps,
            linear: linear.len(),
            states: reference.states.len(),
        });
    }

    let layout = Layout { horizon: n_steps };
    let n = layout.num_vars();

    // ---- COST ----

    let mut p = DMatrix::<f64>::zeros(n, n);
    let mut q = DVector::<f64>::zeros(n);

    for k in 1..=n_steps {
        let factor = if k == n_steps {
            params.terminal_factor
        } else {
            1.0
        };
        for j in 0..NX {
            let w = params.state_weights[j] * factor;
            let i = layout.x(k) + j;
            p[(i, i)] += w;
            q[i] -= w * reference.states[k][j];
        }
    }

    for k in 0..n_steps {
        for j in 0..NU {
            let w = params.input_weights[j];
            let i = layout.u(k) + j;
            p[(i, i)] += w;
            q[i] -= w * reference.inputs[k][j];
        }
    }

    for k in 1..n_steps {
        for j in 0..NU {
            let w = params.input_rate_weights[j];
            let (i, h) = (layout.u(k) + j, layout.u(k - 1) + j);
            p[(i, i)] += w;
            p[(h, h)] += w;
            p[(i, h)] -= w;
            p[(h, i)] -= w;
        }
    }

    // ---- CONSTRAINTS ----

    let num_rows = NX
        + NX * n_steps
        + NU * n_steps
        + n_steps
        + if params.corridor_half_width_m.is_some() {
            n_steps
        } else {
            0
        };
    let mut rows = RowBuilder::new(num_rows, n);

    for j in 0..NX {
        rows.row(&[(layout.x(0) + j, 1.0)], x_now[j], x_now[j]);
    }

    for (k, lin) in linear.iter().enumerate() {
        for r in 0..NX {
            let mut coeffs = vec![(layout.x(k + 1) + r, 1.0)];
            for c in 0..NX {
                coeffs.push((layout.x(k) + c, -lin.ad[(r, c)]));
            }
            for c in 0..NU {
                coeffs.push((layout.u(k) + c, -lin.bd[(r, c)]));
            }
            rows.row(&coeffs, lin.hd[r], lin.hd[r]);
        }
    }

    for k in 0..n_steps {
        rows.row(
            &[(layout.u(k), 1.0)],
            params.min_speed_ms,
            params.max_speed_ms,
        );
        rows.row(
            &[(layout.u(k) + 1, 1.0)],
            -params.max_steer_rad,
            params.max_steer_rad,
        );
    }

    // The first step ramps from the measured speed clamped into the speed bounds
    let dv = params.max_acc_mss * params.dt_s;
    let v0 = clamp(v_now, params.min_speed_ms, params.max_speed_ms);
    rows.row(&[(layout.u(0), 1.0)], v0 - dv, v0 + dv);
    for k in 1..n_steps {
        rows.row(&[(layout.u(k), 1.0), (layout.u(k - 1), -1.0)], -dv, dv);
    }

    if let Some(half_width) = params.corridor_half_width_m {
        for k in 1..=n_steps {
            let r = &reference.states[k];
            let (nx, ny) = (-r[2].sin(), r[2].cos());
            let offset = nx * r[0] + ny * r[1];
            rows.row(
                &[(layout.x(k), nx), (layout.x(k) + 1, ny)],
                offset - half_width,
                offset + half_width,
            );
        }
    }

    Ok((
        QpProblem {
            p,
            q,
            a: rows.a,
            l: rows.l,
            u: rows.u,
        },
        layout,
    ))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc::{dynamics::linearize, test_params, OsqpSolver, QpSolver};

    fn straight_reference(n: usize) -> Reference {
        Reference {
            states: (0..=n).map(|k| State::new(0.2 * k as f64, 0.0, 0.0)).collect(),
            inputs: vec![Input::new(2.0, 0.0); n],
        }
    }

    #[test]
    fn test_dimensions() {
        let mut params = test_params(3);
        let reference = straight_reference(3);
        let linear: Vec<_> = (0..3)
            .map(|k| linearize(&reference.states[k], &reference.inputs[k], 0.1, 0.33))
            .collect();

        let (qp, layout) = build_qp(&linear, &reference, &State::zeros(), 2.0, &params).unwrap();
        assert_eq!(layout.num_vars(), 3 * 4 + 2 * 3);
        assert_eq!(qp.num_vars(), 18);
        assert_eq!(qp.num_cons(), 3 + 9 + 6 + 3);
        assert!(qp.validate().is_ok());

        // The reference itself satisfies every row
        let mut z = DVector::zeros(18);
        for k in 0..=3 {
            for j in 0..NX {
                z[layout.x(k) + j] = reference.states[k][j];
            }
        }
        for k in 0..3 {
            z[layout.u(k)] = 2.0;
        }
        let az = &qp.a * &z;
        for i in 0..qp.num_cons() {
            assert!(az[i] >= qp.l[i] - 1e-9 && az[i] <= qp.u[i] + 1e-9, "row {}", i);
        }

        params.corridor_half_width_m = Some(0.5);
        let (qp, _) = build_qp(&linear, &reference, &State::zeros(), 2.0, &params).unwrap();
        assert_eq!(qp.num_cons(), 3 + 9 + 6 + 3 + 3);
    }

    #[test]
    fn test_mismatch() {
        let params = test_params(3);
        let reference = straight_reference(3);
        assert!(matches!(
            build_qp(&[], &reference, &State::zeros(), 0.0, &params),
            Err(MpcError::HorizonMismatch { .. })
        ));

        let empty = Reference {
            states: vec![State::zeros()],
            inputs: vec![],
        };
        assert!(matches!(
            build_qp(&[], &empty, &State::zeros(), 0.0, &params),
            Err(MpcError::EmptyHorizon)
        ));
    }

    #[test]
    fn test_speed_outside_bounds_feasible() {
        let params = test_params(10);
        let reference = straight_reference(10);
        let linear: Vec<_> = (0..10)
            .map(|k| linearize(&reference.states[k], &reference.inputs[k], 0.1, 0.33))
            .collect();
        let solver = OsqpSolver::new(params.solver.clone());

        // Over the speed limit, and reversing slightly
        for &(v_now, lo, hi) in &[(6.0, 4.5, 5.0), (-0.6, 0.0, 0.5)] {
            let (qp, layout) =
                build_qp(&linear, &reference, &State::zeros(), v_now, &params).unwrap();

            let sol = solver.solve(&qp).unwrap();
            let u0 = layout.input(&sol.x, 0);
            assert!(u0[0] >= lo - 1e-4 && u0[0] <= hi + 1e-4, "v_now {}: {}", v_now, u0[0]);
        }
    }
}
