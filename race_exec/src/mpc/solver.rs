//! # OSQP backed QP solver
//!
//! Converts the dense [`QpProblem`] into the compressed sparse column form OSQP expects and maps
//! the solver status onto [`QpError`]. Only a fully solved status is returned as a solution.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{borrow::Cow, time::Duration};

use log::trace;
use nalgebra::{DMatrix, DVector};
use osqp::{CscMatrix, Problem, Settings, Status};
use serde::Deserialize;

use super::qp::{QpError, QpProblem, QpSolution, QpSolver};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct OsqpSettings {
    /// ADMM step size
    pub rho: f64,

    /// Regularisation of the primal variables
    pub sigma: f64,

    /// Over-relaxation parameter, in (0, 2)
    pub alpha: f64,

    /// Absolute convergence tolerance
    pub eps_abs: f64,

    /// Relative convergence tolerance
    pub eps_rel: f64,

    /// Tolerance of the primal infeasibility certificate
    pub eps_prim_inf: f64,

    /// Tolerance of the dual infeasibility certificate
    pub eps_dual_inf: f64,

    /// Iteration limit
    pub max_iter: u32,

    /// Wall clock limit on setup and solve, unlimited if not set
    ///
    /// Units: seconds
    pub time_limit_s: Option<f64>,

    /// Rebalance the step size from the ratio of the primal and dual residuals
    pub adaptive_rho: bool,

    /// Refine the solution by solving the reduced KKT system of the active constraints
    pub polish: bool,
}

/// Solves [`QpProblem`]s with OSQP.
#[derive(Debug, Clone)]
pub struct OsqpSolver {
    settings: OsqpSettings,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for OsqpSettings {
    fn default() -> Self {
        Self {
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            eps_abs: 1e-3,
            eps_rel: 1e-3,
            eps_prim_inf: 1e-4,
            eps_dual_inf: 1e-4,
            max_iter: 4000,
            time_limit_s: None,
            adaptive_rho: true,
            polish: true,
        }
    }
}

impl OsqpSettings {
    fn to_osqp(&self) -> Settings {
        Settings::default()
            .rho(self.rho)
            .sigma(self.sigma)
            .alpha(self.alpha)
            .eps_abs(self.eps_abs)
            .eps_rel(self.eps_rel)
            .eps_prim_inf(self.eps_prim_inf)
            .eps_dual_inf(self.eps_dual_inf)
            .max_iter(self.max_iter)
            .time_limit(self.time_limit_s.map(Duration::from_secs_f64))
            .adaptive_rho(self.adaptive_rho)
            .polish(self.polish)
            .verbose(false)
    }
}

impl OsqpSolver {
    pub fn new(settings: OsqpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OsqpSettings {
        &self.settings
    }
}

impl QpSolver for OsqpSolver {
    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, QpError> {
        problem.validate()?;

        if let Some(limit_s) = self.settings.time_limit_s {
            if !(limit_s > 0.0 && limit_s.is_finite()) {
                return Err(QpError::InvalidProblem(format!(
                    "time limit of {} s is not positive",
                    limit_s
                )));
            }
        }

        let p = dense_to_csc(&problem.p, true);
        let a = dense_to_csc(&problem.a, false);

        let mut prob = Problem::new(
            p,
            problem.q.as_slice(),
            a,
            problem.l.as_slice(),
            problem.u.as_slice(),
            &self.settings.to_osqp(),
        )
        .map_err(|e| QpError::Setup(e.to_string()))?;

        let status = prob.solve();
        let iterations = status.iter() as usize;
        let solve_time = status.solve_time();
        trace!(
            "OSQP finished after {} iterations in {:?}",
            iterations,
            solve_time
        );

        match status {
            Status::Solved(solution) => {
                let x = DVector::from_column_slice(solution.x());
                let y = DVector::from_column_slice(solution.y());
                Ok(QpSolution {
                    primal_residual: problem.primal_residual(&x),
                    dual_residual: problem.dual_residual(&x, &y),
                    x,
                    y,
                    iterations,
                    solve_time,
                })
            }
            Status::SolvedInaccurate(_) => Err(QpError::Inaccurate(iterations)),
            Status::MaxIterationsReached(_) => Err(QpError::MaxIterations(iterations)),
            Status::TimeLimitReached(_) => Err(QpError::TimeLimit {
                iterations,
                limit_s: self.settings.time_limit_s.unwrap_or(f64::INFINITY),
            }),
            Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => {
                Err(QpError::PrimalInfeasible)
            }
            Status::DualInfeasible(_) | Status::DualInfeasibleInaccurate(_) => {
                Err(QpError::DualInfeasible)
            }
            Status::NonConvex(_) => Err(QpError::NonConvex),
            _ => Err(QpError::Unsolved),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compress a dense matrix column by column, dropping zeros.
///
/// If `upper` is set only entries on or above the diagonal are kept.
fn dense_to_csc(m: &DMatrix<f64>, upper: bool) -> CscMatrix<'static> {
    let (nrows, ncols) = m.shape();
    let mut indptr = Vec::with_capacity(ncols + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();

    indptr.push(0);
    for c in 0..ncols {
        let last_row = if upper { (c + 1).min(nrows) } else { nrows };
        for r in 0..last_row {
            let v = m[(r, c)];
            if v != 0.0 {
                indices.push(r);
                data.push(v);
            }
        }
        indptr.push(data.len());
    }

    CscMatrix {
        nrows,
        ncols,
        indptr: Cow::Owned(indptr),
        indices: Cow::Owned(indices),
        data: Cow::Owned(data),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn solver() -> OsqpSolver {
        OsqpSolver::new(OsqpSettings {
            eps_abs: 1e-6,
            eps_rel: 1e-6,
            max_iter: 20000,
            ..Default::default()
        })
    }

    /// Minimise (x0 - 3)^2 + (x1 + 2)^2 subject to x0 + x1 = 0.5 and 0 <= x0 <= 1
    fn pulled_problem() -> QpProblem {
        QpProblem {
            p: DMatrix::identity(2, 2) * 2.0,
            q: DVector::from_vec(vec![-6.0, 4.0]),
            a: DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, 0.0, 0.0, 1.0]),
            l: DVector::from_vec(vec![0.5, 0.0, f64::NEG_INFINITY]),
            u: DVector::from_vec(vec![0.5, 1.0, f64::INFINITY]),
        }
    }

    #[test]
    fn test_dense_to_csc() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 5.0, 2.0, 0.0, 2.0, 6.0]);

        let full = dense_to_csc(&m, false);
        assert_eq!(full.indptr.as_ref(), &[0, 2, 5, 7]);
        assert_eq!(full.indices.as_ref(), &[0, 1, 0, 1, 2, 1, 2]);
        assert_eq!(full.data.as_ref(), &[4.0, 1.0, 1.0, 5.0, 2.0, 2.0, 6.0]);

        let upper = dense_to_csc(&m, true);
        assert_eq!(upper.indptr.as_ref(), &[0, 1, 3, 5]);
        assert_eq!(upper.indices.as_ref(), &[0, 0, 1, 1, 2]);
        assert_eq!(upper.data.as_ref(), &[4.0, 1.0, 5.0, 2.0, 6.0]);

        let rect = dense_to_csc(&DMatrix::from_row_slice(1, 2, &[0.0, 3.0]), false);
        assert_eq!((rect.nrows, rect.ncols), (1, 2));
        assert_eq!(rect.indptr.as_ref(), &[0, 0, 1]);
    }

    #[test]
    fn test_active_constraints() {
        let qp = pulled_problem();
        let sol = solver().solve(&qp).unwrap();

        // The box on x0 is active, the equality fixes x1
        assert!((sol.x[0] - 1.0).abs() < 1e-5);
        assert!((sol.x[1] + 0.5).abs() < 1e-5);
        assert!(sol.primal_residual < 1e-5);
        assert!(sol.dual_residual < 1e-4);
        assert!(sol.iterations > 0);
    }

    #[test]
    fn test_infeasible() {
        let mut qp = pulled_problem();
        // x0 + x1 = 0.5 with x0 = 1 and x1 >= 0
        qp.l[1] = 1.0;
        qp.l[2] = 0.0;
        assert!(matches!(
            solver().solve(&qp),
            Err(QpError::PrimalInfeasible)
        ));
    }

    #[test]
    fn test_iteration_limit() {
        let s = OsqpSolver::new(OsqpSettings {
            eps_abs: 1e-10,
            eps_rel: 1e-10,
            max_iter: 1,
            polish: false,
            ..Default::default()
        });
        let res = s.solve(&pulled_problem());
        assert!(
            matches!(res, Err(QpError::MaxIterations(1)) | Err(QpError::Inaccurate(_))),
            "{:?}",
            res
        );
    }

    #[test]
    fn test_invalid_rejected() {
        let mut qp = pulled_problem();
        qp.q = DVector::from_vec(vec![1.0]);
        assert!(matches!(
            solver().solve(&qp),
            Err(QpError::InvalidProblem(_))
        ));

        let s = OsqpSolver::new(OsqpSettings {
            time_limit_s: Some(0.0),
            ..Default::default()
        });
        assert!(matches!(
            s.solve(&pulled_problem()),
            Err(QpError::InvalidProblem(_))
        ));
    }
}
