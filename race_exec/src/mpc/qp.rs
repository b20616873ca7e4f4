//! # Quadratic programs
//!
//! Problems of the form
//!
//! ```text
//! minimise    1/2 x' P x + q' x
//! subject to  l <= A x <= u
//! ```
//!
//! Equality constraints have `l == u`, one sided constraints use infinite bounds. Solvers are
//! accessed through the [`QpSolver`] trait so the MPC doesn't depend on a particular method.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use nalgebra::{DMatrix, DVector};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Cost Hessian (n x n), must be symmetric positive semi-definite
    pub p: DMatrix<f64>,

    /// Linear cost (n)
    pub q: DVector<f64>,

    /// Constraint matrix (m x n)
    pub a: DMatrix<f64>,

    /// Lower bounds (m)
    pub l: DVector<f64>,

    /// Upper bounds (m)
    pub u: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    /// Primal solution
    pub x: DVector<f64>,

    /// Constraint multipliers
    pub y: DVector<f64>,

    /// Number of iterations taken
    pub iterations: usize,

    /// Infinity norm of the primal residual at exit
    pub primal_residual: f64,

    /// Infinity norm of the dual residual at exit
    pub dual_residual: f64,

    /// Wall clock time taken
    pub solve_time: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum QpError {
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    #[error("Solver setup failed: {0}")]
    Setup(String),

    #[error("The cost is not convex")]
    NonConvex,

    #[error("Solution not converged after {0} iterations")]
    MaxIterations(usize),

    #[error("Solution only met the relaxed tolerances after {0} iterations")]
    Inaccurate(usize),

    #[error("Time limit of {limit_s} s reached after {iterations} iterations")]
    TimeLimit { iterations: usize, limit_s: f64 },

    #[error("The problem is primal infeasible")]
    PrimalInfeasible,

    #[error("The problem is dual infeasible, the cost is unbounded below")]
    DualInfeasible,

    #[error("The solver stopped without a solution")]
    Unsolved,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A method of solving [`QpProblem`]s.
pub trait QpSolver: Send + Sync {
    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, QpError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl QpProblem {
    /// Number of decision variables
    pub fn num_vars(&self) -> usize {
        self.q.len()
    }

    /// Number of constraints
    pub fn num_cons(&self) -> usize {
        self.l.len()
    }

    /// Check the dimensions and bounds are consistent.
    pub fn validate(&self) -> Result<(), QpError> {
        let n = self.num_vars();
        let m = self.num_cons();

        if n == 0 {
            return Err(QpError::InvalidProblem("no variables".into()));
        }
        if self.p.shape() != (n, n) {
            return Err(QpError::InvalidProblem(format!(
                "P is {:?}, expected {:?}",
                self.p.shape(),
                (n, n)
            )));
        }
        if self.a.shape() != (m, n) || self.u.len() != m {
            return Err(QpError::InvalidProblem(format!(
                "A is {:?} with {} lower and {} upper bounds, expected {:?}",
                self.a.shape(),
                m,
                self.u.len(),
                (m, n)
            )));
        }
        for i in 0..m {
            if self.l[i].is_nan() || self.u[i].is_nan() || self.l[i] > self.u[i] {
                return Err(QpError::InvalidProblem(format!(
                    "bounds of constraint {} are [{}, {}]",
                    i, self.l[i], self.u[i]
                )));
            }
        }
        if self.p.iter().chain(self.q.iter()).chain(self.a.iter()).any(|v| !v.is_finite()) {
            return Err(QpError::InvalidProblem("non-finite cost or constraint".into()));
        }

        Ok(())
    }

    /// Objective value at `x`.
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.p * x)) + self.q.dot(x)
    }

    /// Infinity norm of the distance of `A x` from the bounds.
    pub fn primal_residual(&self, x: &DVector<f64>) -> f64 {
        let ax = &self.a * x;
        (0..self.num_cons())
            .map(|i| (self.l[i] - ax[i]).max(ax[i] - self.u[i]).max(0.0))
            .fold(0.0, f64::max)
    }

    /// Infinity norm of `P x + q + A' y`.
    pub fn dual_residual(&self, x: &DVector<f64>, y: &DVector<f64>) -> f64 {
        (&self.p * x + &self.q + self.a.tr_mul(y)).amax()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        let mut qp = QpProblem {
            p: DMatrix::identity(2, 2),
            q: DVector::from_vec(vec![1.0, -1.0]),
            a: DMatrix::identity(2, 2),
            l: DVector::from_vec(vec![0.0, f64::NEG_INFINITY]),
            u: DVector::from_vec(vec![1.0, 2.0]),
        };
        assert!(qp.validate().is_ok());
        assert_eq!(qp.objective(&DVector::from_vec(vec![1.0, 1.0])), 1.0);
        assert_eq!(qp.primal_residual(&DVector::from_vec(vec![1.5, -4.0])), 0.5);
        assert_eq!(
            qp.dual_residual(&DVector::from_vec(vec![0.0, 0.0]), &DVector::from_vec(vec![-1.0, 3.0])),
            2.0
        );

        qp.l[0] = 3.0;
        assert!(matches!(qp.validate(), Err(QpError::InvalidProblem(_))));

        qp.l[0] = 0.0;
        qp.a = DMatrix::identity(3, 2);
        assert!(matches!(qp.validate(), Err(QpError::InvalidProblem(_))));
    }
}
